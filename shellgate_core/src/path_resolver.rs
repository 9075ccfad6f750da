//! # Path Resolution
//!
//! Every path a user hands to the engine is turned into a [`PathExpr`] before
//! it reaches a remote command. A `PathExpr` is always rooted: either at the
//! remote home directory (`~`, `~/a/b`) or at the filesystem root (`/a/b`).
//! Relative input is joined onto the session's current directory.
//!
//! ## Jail policy
//!
//! For [`PathPolicy::Jailed`] targets the resolved path can never leave `~`:
//!
//! - an absolute request is clamped to `~`;
//! - `..` pops one accumulated segment, and popping above `~` clamps the whole
//!   result to `~`;
//! - `~user` forms are clamped to `~`.
//!
//! On [`PathPolicy::Open`] targets `~user` stays symbolic like `~` and is
//! expanded by the remote shell.
//!
//! Clamping is silent. Only structurally invalid input (empty, NUL bytes) is
//! rejected with a [`JailViolation`].
//!
//! For [`PathPolicy::Open`] targets `..` and absolute paths pass through and
//! the remote shell decides what they mean.
//!
//! `~` is never expanded here. It stays symbolic and is rendered unquoted so
//! the remote shell expands it.

use crate::error::JailViolation;
use crate::shell_syntax::{is_glob_char, quote, quote_pattern};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Which path rules apply to a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPolicy {
    Open,
    Jailed,
}

impl PathPolicy {
    pub fn is_jailed(self) -> bool {
        self == PathPolicy::Jailed
    }
}

/// A rooted, normalized, not-yet-expanded remote path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathExpr {
    /// `~`
    Home,
    /// `~/<rel>`; `rel` has no leading or trailing `/`.
    HomeRelative(String),
    /// `/<abs>`; the stored value keeps its leading `/`.
    Absolute(String),
    /// `~user` or `~user/<rel>`; open targets only.
    UserHome { user: String, rel: String },
}

impl PathExpr {
    fn from_segments(root: Root, segments: &[String]) -> Self {
        match (root, segments.is_empty()) {
            (Root::Home, true) => PathExpr::Home,
            (Root::Home, false) => PathExpr::HomeRelative(segments.join("/")),
            (Root::Filesystem, _) => PathExpr::Absolute(format!("/{}", segments.join("/"))),
            (Root::UserHome(user), _) => PathExpr::UserHome {
                user,
                rel: segments.join("/"),
            },
        }
    }

    fn root_and_segments(&self) -> (Root, Vec<String>) {
        match self {
            PathExpr::Home => (Root::Home, Vec::new()),
            PathExpr::HomeRelative(rel) => (Root::Home, split_segments(rel)),
            PathExpr::Absolute(abs) => (Root::Filesystem, split_segments(abs)),
            PathExpr::UserHome { user, rel } => (Root::UserHome(user.clone()), split_segments(rel)),
        }
    }

    pub fn is_home(&self) -> bool {
        matches!(self, PathExpr::Home)
    }

    /// True for `/` itself.
    pub fn is_filesystem_root(&self) -> bool {
        matches!(self, PathExpr::Absolute(p) if p == "/")
    }

    pub fn has_glob(&self) -> bool {
        self.to_string().chars().any(is_glob_char)
    }

    /// Last path segment, `None` for `~` and `/`.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            PathExpr::Home => None,
            PathExpr::HomeRelative(rel) => rel.rsplit('/').next(),
            PathExpr::Absolute(abs) => abs.rsplit('/').next().filter(|s| !s.is_empty()),
            PathExpr::UserHome { rel, .. } => rel.rsplit('/').next().filter(|s| !s.is_empty()),
        }
    }

    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name()?;
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => Some(ext),
            _ => None,
        }
    }

    pub fn parent(&self) -> PathExpr {
        let (root, mut segments) = self.root_and_segments();
        segments.pop();
        PathExpr::from_segments(root, &segments)
    }

    /// Appends a literal child segment (no `..` handling).
    pub fn join(&self, child: &str) -> PathExpr {
        let (root, mut segments) = self.root_and_segments();
        segments.extend(split_segments(child));
        PathExpr::from_segments(root, &segments)
    }

    /// `script.py` becomes `script.py<suffix>` in the same directory.
    pub fn with_name_suffix(&self, suffix: &str) -> PathExpr {
        let (root, mut segments) = self.root_and_segments();
        match segments.last_mut() {
            Some(last) => last.push_str(suffix),
            None => segments.push(suffix.trim_start_matches('.').to_string()),
        }
        PathExpr::from_segments(root, &segments)
    }

    /// Shell rendering that treats every character literally except the
    /// leading `~`.
    pub fn to_shell(&self) -> String {
        match self {
            PathExpr::Home => "~".to_string(),
            PathExpr::HomeRelative(rel) => format!("~/{}", quote(rel)),
            PathExpr::Absolute(abs) => quote(abs),
            PathExpr::UserHome { user, rel } if rel.is_empty() => format!("~{user}"),
            PathExpr::UserHome { user, rel } => format!("~{user}/{}", quote(rel)),
        }
    }

    /// Shell rendering that keeps glob metacharacters active.
    pub fn to_shell_pattern(&self) -> String {
        match self {
            PathExpr::Home => "~".to_string(),
            PathExpr::HomeRelative(rel) => format!("~/{}", quote_pattern(rel)),
            PathExpr::Absolute(abs) => quote_pattern(abs),
            PathExpr::UserHome { user, rel } if rel.is_empty() => format!("~{user}"),
            PathExpr::UserHome { user, rel } => format!("~{user}/{}", quote_pattern(rel)),
        }
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathExpr::Home => write!(f, "~"),
            PathExpr::HomeRelative(rel) => write!(f, "~/{rel}"),
            PathExpr::Absolute(abs) => write!(f, "{abs}"),
            PathExpr::UserHome { user, rel } if rel.is_empty() => write!(f, "~{user}"),
            PathExpr::UserHome { user, rel } => write!(f, "~{user}/{rel}"),
        }
    }
}

impl FromStr for PathExpr {
    type Err = JailViolation;

    /// Parses an already-rooted expression; relative input is resolved
    /// against `~` and `..` is kept literally.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        resolve(&PathExpr::Home, s, PathPolicy::Open)
    }
}

impl Serialize for PathExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PathExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Root {
    Home,
    Filesystem,
    UserHome(String),
}

/// Splits `~name/rest` when `name` is a login name the shell would expand.
fn split_user_home(requested: &str) -> Option<(&str, &str)> {
    let rest = requested.strip_prefix('~')?;
    let (user, tail) = rest.split_once('/').unwrap_or((rest, ""));
    let valid = !user.is_empty()
        && !user.starts_with('-')
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    valid.then_some((user, tail))
}

fn split_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .map(str::to_string)
        .collect()
}

/// Resolves `requested` against `session_dir` under `policy`.
pub fn resolve(
    session_dir: &PathExpr,
    requested: &str,
    policy: PathPolicy,
) -> Result<PathExpr, JailViolation> {
    let requested = requested.trim();
    if requested.is_empty() {
        return Err(JailViolation::EmptyPath);
    }
    if requested.contains('\0') {
        return Err(JailViolation::NulByte);
    }

    let (root, mut stack, rest) = if requested == "~" {
        (Root::Home, Vec::new(), "")
    } else if let Some(rest) = requested.strip_prefix("~/") {
        (Root::Home, Vec::new(), rest)
    } else if requested.starts_with('~') && policy.is_jailed() {
        return Ok(PathExpr::Home);
    } else if let Some((user, rest)) = split_user_home(requested) {
        (Root::UserHome(user.to_string()), Vec::new(), rest)
    } else if let Some(rest) = requested.strip_prefix('/') {
        if policy.is_jailed() {
            return Ok(PathExpr::Home);
        }
        (Root::Filesystem, Vec::new(), rest)
    } else {
        let base = match (policy, session_dir) {
            // A jailed session directory is always home-rooted; anything else
            // is treated as `~`.
            (PathPolicy::Jailed, PathExpr::Absolute(_)) => PathExpr::Home,
            _ => session_dir.clone(),
        };
        let (root, segments) = base.root_and_segments();
        (root, segments, requested)
    };

    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." if policy.is_jailed() => {
                if stack.pop().is_none() {
                    return Ok(PathExpr::Home);
                }
            }
            other => stack.push(other.to_string()),
        }
    }

    Ok(PathExpr::from_segments(root, &stack))
}

/// Maps a physical remote path (as printed by `pwd -P`) back to symbolic
/// form, given the physical home directory.
pub fn canonicalize(physical: &str, home: &str, policy: PathPolicy) -> PathExpr {
    let physical = physical.trim();
    let home = home.trim().trim_end_matches('/');

    if !home.is_empty() {
        if physical.trim_end_matches('/') == home {
            return PathExpr::Home;
        }
        if let Some(rest) = physical.strip_prefix(home).and_then(|r| r.strip_prefix('/')) {
            let segments = split_segments(rest);
            return PathExpr::from_segments(Root::Home, &segments);
        }
    }

    match policy {
        PathPolicy::Jailed => PathExpr::Home,
        PathPolicy::Open => {
            let segments = split_segments(physical);
            PathExpr::from_segments(Root::Filesystem, &segments)
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Rewrites every whole-path occurrence of the physical directory `root` in
/// `text` to `~`. `/tmp/jail/a` becomes `~/a`; `/tmp/jail2` is left alone.
pub fn mask_root(text: &str, root: &str) -> String {
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(root) {
        let before = rest[..pos].chars().next_back();
        let after = rest[pos + root.len()..].chars().next();
        let starts_path = !before.is_some_and(|c| is_name_char(c) || c == '/');
        let ends_path = !after.is_some_and(is_name_char);
        out.push_str(&rest[..pos]);
        if starts_path && ends_path {
            out.push('~');
        } else {
            out.push_str(root);
        }
        rest = &rest[pos + root.len()..];
    }
    out.push_str(rest);
    out
}

/// Maps a home-rooted expression onto a local jail root, refusing anything
/// that would leave it. Symlinks are resolved for the deepest existing
/// ancestor.
pub async fn validate_jailed_path(path: &PathExpr, root: &Path) -> Result<PathBuf, JailViolation> {
    let outside = || JailViolation::OutsideRoot {
        path: path.to_string(),
    };

    let root_canonical = tokio::fs::canonicalize(root).await.map_err(|_| outside())?;
    let relative = match path {
        PathExpr::Home => PathBuf::new(),
        PathExpr::HomeRelative(rel) => PathBuf::from(rel),
        PathExpr::Absolute(_) | PathExpr::UserHome { .. } => return Err(outside()),
    };
    let candidate = normalize_path(&root_canonical.join(relative));

    // Canonicalize the deepest ancestor that exists so a symlink inside the
    // jail cannot point the write elsewhere.
    let mut existing = candidate.as_path();
    let mut missing = Vec::new();
    let resolved_base = loop {
        match tokio::fs::canonicalize(existing).await {
            Ok(p) => break p,
            Err(_) => {
                let Some(name) = existing.file_name() else {
                    return Err(outside());
                };
                missing.push(name.to_os_string());
                existing = existing.parent().ok_or_else(outside)?;
            }
        }
    };

    let mut resolved = resolved_base;
    for name in missing.into_iter().rev() {
        resolved.push(name);
    }

    if resolved.starts_with(&root_canonical) {
        Ok(resolved)
    } else {
        Err(outside())
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut stack = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                stack.pop();
            }
            Component::Normal(c) => stack.push(c),
            Component::RootDir => {
                stack.clear();
            }
            _ => {}
        }
    }

    let mut result = PathBuf::from("/");
    for c in stack {
        result.push(c);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    fn home_rel(rel: &str) -> PathExpr {
        PathExpr::HomeRelative(rel.to_string())
    }

    #[test]
    fn relative_paths_join_the_session_directory() -> Result<()> {
        assert_eq!(resolve(&PathExpr::Home, "docs", PathPolicy::Open)?, home_rel("docs"));
        assert_eq!(
            resolve(&home_rel("project"), "src/./main.rs", PathPolicy::Jailed)?,
            home_rel("project/src/main.rs")
        );
        assert_eq!(
            resolve(&PathExpr::Absolute("/var".into()), "log", PathPolicy::Open)?,
            PathExpr::Absolute("/var/log".into())
        );
        Ok(())
    }

    #[test]
    fn jailed_escape_clamps_to_home() -> Result<()> {
        let session = home_rel("project");
        assert_eq!(resolve(&session, "../../etc", PathPolicy::Jailed)?, PathExpr::Home);
        assert_eq!(resolve(&session, "/etc/passwd", PathPolicy::Jailed)?, PathExpr::Home);
        assert_eq!(resolve(&session, "~root/.ssh", PathPolicy::Jailed)?, PathExpr::Home);
        assert_eq!(resolve(&session, "..", PathPolicy::Jailed)?, PathExpr::Home);
        assert_eq!(resolve(&session, "../other", PathPolicy::Jailed)?, home_rel("other"));
        Ok(())
    }

    #[test]
    fn open_targets_pass_dotdot_and_absolute_through() -> Result<()> {
        let session = home_rel("project");
        assert_eq!(resolve(&session, "../../etc", PathPolicy::Open)?, home_rel("project/../../etc"));
        assert_eq!(
            resolve(&session, "/etc/passwd", PathPolicy::Open)?,
            PathExpr::Absolute("/etc/passwd".into())
        );
        assert_eq!(resolve(&session, "/", PathPolicy::Open)?, PathExpr::Absolute("/".into()));
        Ok(())
    }

    #[test]
    fn open_targets_leave_user_homes_to_the_shell() -> Result<()> {
        let session = home_rel("project");
        let ssh_dir = resolve(&session, "~root/.ssh", PathPolicy::Open)?;
        assert_eq!(
            ssh_dir,
            PathExpr::UserHome {
                user: "root".into(),
                rel: ".ssh".into()
            }
        );
        assert_eq!(ssh_dir.to_string(), "~root/.ssh");
        assert_eq!(ssh_dir.to_shell(), "~root/'.ssh'");
        assert_eq!(ssh_dir.file_name(), Some(".ssh"));

        let bare = resolve(&session, "~deploy", PathPolicy::Open)?;
        assert_eq!(bare.to_shell(), "~deploy");
        assert_eq!(bare.parent(), bare);

        // Not a login name, so the shell would not expand it either.
        assert_eq!(
            resolve(&session, "~not a user", PathPolicy::Open)?,
            home_rel("project/~not a user")
        );
        Ok(())
    }

    #[test]
    fn structurally_invalid_input_is_rejected() {
        assert_eq!(resolve(&PathExpr::Home, "   ", PathPolicy::Open), Err(JailViolation::EmptyPath));
        assert_eq!(resolve(&PathExpr::Home, "a\0b", PathPolicy::Jailed), Err(JailViolation::NulByte));
    }

    #[test]
    fn globs_are_kept_for_the_remote_shell() -> Result<()> {
        let resolved = resolve(&PathExpr::Home, "proj-*", PathPolicy::Jailed)?;
        assert!(resolved.has_glob());
        assert_eq!(resolved.to_shell_pattern(), "~/'proj-'*");
        assert_eq!(resolved.to_shell(), "~/'proj-*'");
        Ok(())
    }

    #[test]
    fn rendering_quotes_everything_but_the_tilde() {
        assert_eq!(PathExpr::Home.to_shell(), "~");
        assert_eq!(home_rel("it's here").to_shell(), r"~/'it'\''s here'");
        assert_eq!(PathExpr::Absolute("/tmp/x y".into()).to_shell(), "'/tmp/x y'");
    }

    #[test]
    fn path_helpers() {
        let script = home_rel("bots/run.py");
        assert_eq!(script.file_name(), Some("run.py"));
        assert_eq!(script.extension(), Some("py"));
        assert_eq!(script.parent(), home_rel("bots"));
        assert_eq!(script.with_name_suffix(".log"), home_rel("bots/run.py.log"));
        assert_eq!(home_rel("a").parent(), PathExpr::Home);
        assert_eq!(PathExpr::Absolute("/a".into()).parent(), PathExpr::Absolute("/".into()));
        assert_eq!(home_rel(".bashrc").extension(), None);
        assert_eq!(PathExpr::Home.join("x/y"), home_rel("x/y"));
        assert!(PathExpr::Absolute("/".into()).is_filesystem_root());
    }

    #[test]
    fn canonicalize_maps_home_prefix_back_to_tilde() {
        let home = "/srv/jail/user_1/server_2";
        assert_eq!(canonicalize(home, home, PathPolicy::Jailed), PathExpr::Home);
        assert_eq!(
            canonicalize("/srv/jail/user_1/server_2/a/b", home, PathPolicy::Jailed),
            home_rel("a/b")
        );
        assert_eq!(canonicalize("/etc", home, PathPolicy::Jailed), PathExpr::Home);
        assert_eq!(
            canonicalize("/srv/jail/user_1/server_20", home, PathPolicy::Jailed),
            PathExpr::Home
        );
        assert_eq!(
            canonicalize("/etc", "/home/alice", PathPolicy::Open),
            PathExpr::Absolute("/etc".into())
        );
        assert_eq!(canonicalize("/", "/home/alice", PathPolicy::Open), PathExpr::Absolute("/".into()));
    }

    #[test]
    fn mask_root_rewrites_whole_paths_only() {
        let root = "/srv/jail/user_1/server_2";
        assert_eq!(mask_root("/srv/jail/user_1/server_2\n", root), "~\n");
        assert_eq!(
            mask_root("cat: /srv/jail/user_1/server_2/a b: No such file", root),
            "cat: ~/a b: No such file"
        );
        assert_eq!(
            mask_root("/srv/jail/user_1/server_20/x", root),
            "/srv/jail/user_1/server_20/x"
        );
        assert_eq!(mask_root("/mnt/srv/jail/user_1/server_2", root), "/mnt/srv/jail/user_1/server_2");
        assert_eq!(mask_root("HOME=/srv/jail/user_1/server_2/", &format!("{root}/")), "HOME=~/");
        assert_eq!(mask_root("anything", "/"), "anything");
    }

    #[test]
    fn serde_uses_the_display_form() -> Result<()> {
        let json = serde_json::to_string(&home_rel("a b"))?;
        assert_eq!(json, "\"~/a b\"");
        let back: PathExpr = serde_json::from_str(&json)?;
        assert_eq!(back, home_rel("a b"));
        Ok(())
    }

    #[tokio::test]
    async fn validate_jailed_path_inside_root() -> Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path();
        std::fs::create_dir(root.join("data"))?;

        let validated = validate_jailed_path(&home_rel("data/new.txt"), root).await?;
        assert_eq!(validated, std::fs::canonicalize(root)?.join("data/new.txt"));

        let home = validate_jailed_path(&PathExpr::Home, root).await?;
        assert_eq!(home, std::fs::canonicalize(root)?);
        Ok(())
    }

    #[tokio::test]
    async fn validate_jailed_path_rejects_symlink_escape() -> Result<()> {
        let temp = TempDir::new()?;
        let outside = TempDir::new()?;
        let root = temp.path();
        std::os::unix::fs::symlink(outside.path(), root.join("link"))?;

        let result = validate_jailed_path(&home_rel("link/file.txt"), root).await;
        assert!(matches!(result, Err(JailViolation::OutsideRoot { .. })));

        let absolute = validate_jailed_path(&PathExpr::Absolute("/etc/passwd".into()), root).await;
        assert!(absolute.is_err());
        Ok(())
    }
}
