//! # Shell Session Engine
//!
//! Turns stateless remote command execution into something that behaves like
//! a persistent shell. Every operation follows the same shape:
//!
//! 1. take the target's session lock ([`SessionStore::begin`]);
//! 2. resolve user paths against the session directory under the target's
//!    `PathPolicy`;
//! 3. compose one shell command, quoting every interpolated value;
//! 4. run it through the [`RemoteExecutor`] with an explicit timeout;
//! 5. fold the result back into the session (directory, processes).
//!
//! The lock is held until step 5 finishes, so two tabs driving the same target
//! see each other's effects in order.
//!
//! ## Directory state
//!
//! The remote side keeps no shell between calls. `exec` prefixes
//! `cd <session dir> &&`, and `cd` itself asks the remote shell for the
//! physical directory it ended up in and stores the symbolic form. A failed
//! `cd` leaves the session directory untouched. Shell state other than the
//! directory (`export`, aliases, functions) does not survive between calls.
//!
//! ## Sandboxed targets
//!
//! Exec output shows the jail root as `~`. File operations additionally
//! refuse paths that leave the jail through a symlink.

use crate::error::{EngineError, Result};
use crate::executor::{RemoteExecutor, Transport};
use crate::listing::{DirEntry, filter_dot_entries, parse_listing};
use crate::packages::environment::{self, DiscoveryConfig, python_invocation};
use crate::path_resolver::{PathExpr, canonicalize, mask_root, resolve, validate_jailed_path};
use crate::sanitizer::{CommandSanitizer, Verdict};
use crate::session::{ActiveSession, BackgroundProcess, SessionSnapshot, SessionStore};
use crate::shell_syntax::{bare_cd_target, quote};
use crate::stats::{self, DetailedStats};
use crate::target::{Target, TargetKind};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Prints the physical working directory and the physical home directory.
const REPORT_LOCATION: &str = "printf '%s\\n' \"$(pwd -P)\" && cd ~ && pwd -P";

pub const DEFAULT_SEARCH_RESULTS: usize = 100;
pub const MAX_SEARCH_RESULTS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineTimeouts {
    pub exec: Duration,
    /// Ceiling for caller-supplied exec timeouts.
    pub max_exec: Duration,
    pub install: Duration,
    pub stats: Duration,
    pub search: Duration,
    pub file_ops: Duration,
    pub environment: Duration,
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        Self {
            exec: Duration::from_secs(30),
            max_exec: Duration::from_secs(600),
            install: Duration::from_secs(300),
            stats: Duration::from_secs(8),
            search: Duration::from_secs(60),
            file_ops: Duration::from_secs(30),
            environment: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecOutcome {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Session directory after the command.
    pub current_directory: PathExpr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CdOutcome {
    pub new_directory: PathExpr,
    pub previous_directory: Option<PathExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryListing {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub path: PathExpr,
    pub entries: Vec<DirEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchOutcome {
    pub files: Vec<String>,
    /// The result limit was reached.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionCheck {
    /// Round trip of a no-op command, connection setup included.
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub label: String,
    pub pid: u32,
    /// `false` when the process had already exited.
    pub signalled: bool,
}

pub struct ShellSessionEngine {
    executor: RemoteExecutor,
    sessions: Arc<SessionStore>,
    sanitizer: CommandSanitizer,
    timeouts: EngineTimeouts,
    discovery: DiscoveryConfig,
}

impl ShellSessionEngine {
    pub fn new(transport: Arc<dyn Transport>, sessions: Arc<SessionStore>) -> Self {
        Self {
            executor: RemoteExecutor::new(transport),
            sessions,
            sanitizer: CommandSanitizer::default(),
            timeouts: EngineTimeouts::default(),
            discovery: DiscoveryConfig::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: EngineTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: CommandSanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn executor(&self) -> &RemoteExecutor {
        &self.executor
    }

    pub fn timeouts(&self) -> &EngineTimeouts {
        &self.timeouts
    }

    pub fn discovery(&self) -> &DiscoveryConfig {
        &self.discovery
    }

    fn exec_timeout(&self, command: &str, requested: Option<Duration>) -> Duration {
        match requested {
            Some(t) if !t.is_zero() => t.min(self.timeouts.max_exec),
            _ if command.to_lowercase().contains("pip install") => self.timeouts.install,
            _ => self.timeouts.exec,
        }
    }

    /// Runs a user command in the session directory.
    ///
    /// A nonzero exit is a normal outcome, not an error. A bare `cd` is
    /// handled as a directory change.
    pub async fn exec(
        &self,
        target: &Target,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecOutcome> {
        let command = command.trim();
        if command.is_empty() {
            return Err(EngineError::InvalidInput("command is empty".to_string()));
        }
        if let Verdict::Blocked { reason } = self.sanitizer.check(command, target.policy()) {
            warn!(target_id = %target.id, %reason, "Blocked command");
            return Err(EngineError::CommandBlocked { reason });
        }

        let mut session = self.sessions.begin(&target.id).await;
        session.history.push(command);

        let outcome = if let Some(dir) = bare_cd_target(command) {
            match self.cd_locked(target, &mut session, &dir).await {
                Ok(cd) => ExecOutcome {
                    success: true,
                    exit_code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                    current_directory: cd.new_directory,
                },
                Err(EngineError::RemoteCommandFailure { exit_code, stderr }) => ExecOutcome {
                    success: false,
                    exit_code,
                    stdout: String::new(),
                    stderr,
                    current_directory: session.current_directory.clone(),
                },
                Err(e) => return Err(e),
            }
        } else {
            let composed = format!("cd {} && {}", session.current_directory.to_shell(), command);
            let result = self
                .executor
                .execute(target, &composed, self.exec_timeout(command, timeout))
                .await?;
            ExecOutcome {
                success: result.success,
                exit_code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
                current_directory: session.current_directory.clone(),
            }
        };

        Ok(ExecOutcome {
            stdout: self.jail_view(target, &outcome.stdout).await,
            stderr: self.jail_view(target, &outcome.stderr).await,
            ..outcome
        })
    }

    /// `text` as a sandboxed user should see it: the jail root, under either
    /// its configured or its physical spelling, reads as `~`.
    async fn jail_view(&self, target: &Target, text: &str) -> String {
        let TargetKind::Sandboxed(host) = &target.kind else {
            return text.to_string();
        };
        if text.is_empty() {
            return String::new();
        }
        let mut roots = vec![host.root.to_string_lossy().into_owned()];
        if let Ok(physical) = tokio::fs::canonicalize(&host.root).await {
            roots.push(physical.to_string_lossy().into_owned());
        }
        roots.sort_by_key(|r| std::cmp::Reverse(r.len()));
        roots.dedup();
        roots.iter().fold(text.to_string(), |acc, root| mask_root(&acc, root))
    }

    /// Refuses a sandboxed path that reaches outside the jail through a
    /// symlink. A jail root that does not exist yet has nothing to follow.
    async fn confine(&self, target: &Target, path: &PathExpr) -> Result<()> {
        if let TargetKind::Sandboxed(host) = &target.kind
            && tokio::fs::try_exists(&host.root).await.unwrap_or(false)
        {
            validate_jailed_path(path, &host.root).await?;
        }
        Ok(())
    }

    /// Changes the session directory. `-` returns to the previous one.
    pub async fn cd(&self, target: &Target, path: &str) -> Result<CdOutcome> {
        let mut session = self.sessions.begin(&target.id).await;
        match self.cd_locked(target, &mut session, path).await {
            Err(EngineError::RemoteCommandFailure { exit_code, stderr }) => Err(
                EngineError::remote_failure(exit_code, self.jail_view(target, &stderr).await),
            ),
            other => other,
        }
    }

    async fn cd_locked(
        &self,
        target: &Target,
        session: &mut ActiveSession,
        requested: &str,
    ) -> Result<CdOutcome> {
        let policy = target.policy();
        let requested = if requested.trim() == "-" {
            session
                .previous_directory
                .as_ref()
                .map(PathExpr::to_string)
                .ok_or_else(|| EngineError::InvalidInput("no previous directory".to_string()))?
        } else {
            requested.to_string()
        };
        let resolved = resolve(&session.current_directory, &requested, policy)?;

        let command = if resolved.has_glob() {
            format!(
                "match=$(ls -d -- {pattern} 2>/dev/null | head -n 1)\n\
                 if [ -z \"$match\" ]; then printf 'cd: %s: No such file or directory\\n' {shown} >&2; exit 1; fi\n\
                 cd -- \"$match\" && {REPORT_LOCATION}",
                pattern = resolved.to_shell_pattern(),
                shown = quote(&requested),
            )
        } else {
            format!("cd {} && {REPORT_LOCATION}", resolved.to_shell())
        };

        let result = self
            .executor
            .execute(target, &command, self.timeouts.file_ops)
            .await?;
        if !result.success {
            debug!(target_id = %target.id, requested = %requested, "cd failed; directory unchanged");
            return Err(EngineError::remote_failure(result.exit_code, result.stderr));
        }

        let mut lines = result.stdout.lines().filter(|l| !l.trim().is_empty());
        let (Some(physical), Some(home)) = (lines.next(), lines.next()) else {
            return Err(EngineError::remote_failure(
                result.exit_code,
                "cd: could not determine the new directory",
            ));
        };
        let new_directory = canonicalize(physical, home, policy);
        session.change_directory(new_directory.clone());

        Ok(CdOutcome {
            new_directory,
            previous_directory: session.previous_directory.clone(),
        })
    }

    /// `ls -la` of a path (glob allowed), without the `.` and `..` entries.
    pub async fn ls(&self, target: &Target, path: &str) -> Result<DirectoryListing> {
        let session = self.sessions.begin(&target.id).await;
        let resolved = resolve(&session.current_directory, path, target.policy())?;
        self.confine(target, &resolved).await?;

        let rendered = if resolved.has_glob() {
            resolved.to_shell_pattern()
        } else {
            resolved.to_shell()
        };
        let command = format!("LC_ALL=C ls -la -- {rendered}");
        let result = self
            .executor
            .execute(target, &command, self.timeouts.file_ops)
            .await?;

        Ok(DirectoryListing {
            code: result.exit_code,
            entries: parse_listing(&result.stdout),
            stdout: filter_dot_entries(&result.stdout),
            stderr: result.stderr,
            path: resolved,
        })
    }

    pub async fn read_file(&self, target: &Target, path: &str) -> Result<String> {
        let session = self.sessions.begin(&target.id).await;
        let resolved = resolve(&session.current_directory, path, target.policy())?;
        self.confine(target, &resolved).await?;

        let command = format!("cat -- {}", resolved.to_shell());
        let result = self
            .executor
            .execute(target, &command, self.timeouts.file_ops)
            .await?;
        if !result.success {
            return Err(EngineError::remote_failure(result.exit_code, result.stderr));
        }
        if result.stdout.contains('\0') {
            return Err(EngineError::InvalidInput(format!("{resolved} is not a text file")));
        }
        Ok(result.stdout)
    }

    /// Replaces the whole file, creating parent directories as needed.
    pub async fn write_file(&self, target: &Target, path: &str, content: &str) -> Result<PathExpr> {
        let session = self.sessions.begin(&target.id).await;
        let resolved = self.file_destination(&session, target, path)?;
        self.confine(target, &resolved).await?;
        self.executor
            .upload(target, &resolved, content.as_bytes(), self.timeouts.file_ops)
            .await?;
        Ok(resolved)
    }

    /// Stores uploaded bytes at `remote_path`, or at `remote_path/file_name`
    /// when a file name is given.
    pub async fn upload(
        &self,
        target: &Target,
        remote_path: &str,
        file_name: Option<&str>,
        contents: &[u8],
    ) -> Result<PathExpr> {
        let session = self.sessions.begin(&target.id).await;
        let mut resolved = resolve(&session.current_directory, remote_path, target.policy())?;
        if let Some(name) = file_name {
            let name = name.trim();
            if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0') {
                return Err(EngineError::InvalidInput(format!("'{name}' is not a file name")));
            }
            resolved = resolved.join(name);
        }
        if resolved.is_home() || resolved.is_filesystem_root() {
            return Err(EngineError::InvalidInput(
                "upload destination must name a file".to_string(),
            ));
        }

        self.executor
            .upload(target, &resolved, contents, self.timeouts.file_ops)
            .await?;
        info!(target_id = %target.id, destination = %resolved, bytes = contents.len(), "Stored upload");
        Ok(resolved)
    }

    pub async fn create_file(&self, target: &Target, path: &str) -> Result<PathExpr> {
        let session = self.sessions.begin(&target.id).await;
        let resolved = self.file_destination(&session, target, path)?;
        self.confine(target, &resolved).await?;
        let command = format!(
            "if [ -e {p} ]; then echo 'File already exists' >&2; exit 1; fi\n\
             mkdir -p -- {parent} && touch -- {p}",
            p = resolved.to_shell(),
            parent = resolved.parent().to_shell(),
        );
        self.run_checked(target, &command).await?;
        Ok(resolved)
    }

    pub async fn create_directory(&self, target: &Target, path: &str) -> Result<PathExpr> {
        let session = self.sessions.begin(&target.id).await;
        let resolved = self.file_destination(&session, target, path)?;
        self.confine(target, &resolved).await?;
        let command = format!(
            "if [ -e {p} ]; then echo 'Directory already exists' >&2; exit 1; fi\n\
             mkdir -p -- {p}",
            p = resolved.to_shell(),
        );
        self.run_checked(target, &command).await?;
        Ok(resolved)
    }

    pub async fn rename(&self, target: &Target, old_path: &str, new_path: &str) -> Result<PathExpr> {
        let session = self.sessions.begin(&target.id).await;
        let source = self.file_destination(&session, target, old_path)?;
        let destination = self.file_destination(&session, target, new_path)?;
        // The source may itself be a symlink; only its directory must stay inside.
        self.confine(target, &source.parent()).await?;
        self.confine(target, &destination).await?;
        let command = format!(
            "[ -e {src} ] || [ -L {src} ] || {{ echo 'Source does not exist' >&2; exit 1; }}\n\
             [ ! -e {dst} ] || {{ echo 'Destination already exists' >&2; exit 1; }}\n\
             mv -- {src} {dst}",
            src = source.to_shell(),
            dst = destination.to_shell(),
        );
        self.run_checked(target, &command).await?;
        Ok(destination)
    }

    /// Recursive delete. Refuses `~` and `/`.
    pub async fn delete(&self, target: &Target, path: &str) -> Result<PathExpr> {
        let session = self.sessions.begin(&target.id).await;
        let resolved = self.file_destination(&session, target, path)?;
        self.confine(target, &resolved.parent()).await?;
        let command = format!(
            "[ -e {p} ] || [ -L {p} ] || {{ echo 'No such file or directory' >&2; exit 1; }}\n\
             rm -rf -- {p}",
            p = resolved.to_shell(),
        );
        self.run_checked(target, &command).await?;
        info!(target_id = %target.id, path = %resolved, "Deleted");
        Ok(resolved)
    }

    /// Resolves a path that must name something below `~` or `/`.
    fn file_destination(&self, session: &ActiveSession, target: &Target, path: &str) -> Result<PathExpr> {
        let resolved = resolve(&session.current_directory, path, target.policy())?;
        if resolved.is_home() || resolved.is_filesystem_root() {
            return Err(EngineError::InvalidInput(format!(
                "'{resolved}' cannot be used for this operation"
            )));
        }
        Ok(resolved)
    }

    async fn run_checked(&self, target: &Target, command: &str) -> Result<()> {
        let result = self
            .executor
            .execute(target, command, self.timeouts.file_ops)
            .await?;
        if result.success {
            Ok(())
        } else {
            Err(EngineError::remote_failure(result.exit_code, result.stderr))
        }
    }

    /// Finds regular files whose name contains `pattern`, below `search_path`.
    pub async fn search(
        &self,
        target: &Target,
        search_path: &str,
        pattern: &str,
        max_results: Option<usize>,
    ) -> Result<SearchOutcome> {
        let policy = target.policy();
        let session = self.sessions.begin(&target.id).await;
        let base = resolve(&session.current_directory, search_path, policy)?;
        self.confine(target, &base).await?;
        let limit = max_results
            .unwrap_or(DEFAULT_SEARCH_RESULTS)
            .clamp(1, MAX_SEARCH_RESULTS);

        let command = format!(
            "home=$(cd ~ && pwd -P) && base=$(cd {base} && pwd -P) || exit 1\n\
             printf '%s\\n' \"$home\"\n\
             find \"$base\" -type f -name {name} 2>/dev/null | head -n {limit}",
            base = base.to_shell(),
            name = quote(&format!("*{pattern}*")),
        );
        let result = self
            .executor
            .execute(target, &command, self.timeouts.search)
            .await?;
        if !result.success {
            return Err(EngineError::remote_failure(result.exit_code, result.stderr));
        }

        let mut lines = result.stdout.lines();
        let home = lines.next().unwrap_or_default();
        let files: Vec<String> = lines
            .filter(|l| !l.is_empty())
            .map(|l| canonicalize(l, home, policy).to_string())
            .collect();
        Ok(SearchOutcome {
            truncated: files.len() >= limit,
            files,
        })
    }

    /// Starts a script with `nohup` in its own directory and records its PID
    /// under the script's file name.
    ///
    /// `.py` runs with the managed environment's interpreter, `.sh` with
    /// `sh`, `.bash` with `bash`; anything else is made executable and run
    /// directly. Output goes to `<script>.log` next to the script.
    pub async fn run_background(&self, target: &Target, path: &str) -> Result<BackgroundProcess> {
        let mut session = self.sessions.begin(&target.id).await;
        let script = resolve(&session.current_directory, path, target.policy())?;
        if script.has_glob() {
            return Err(EngineError::InvalidInput(
                "background scripts must be named exactly".to_string(),
            ));
        }
        let label = script
            .file_name()
            .ok_or_else(|| EngineError::InvalidInput(format!("'{script}' is not a file")))?
            .to_string();
        self.confine(target, &script).await?;
        if let Some(existing) = session.processes.get(&label).cloned() {
            if !self.live_pids(target, &[existing.pid]).await?.is_empty() {
                return Err(EngineError::AlreadyRunning {
                    label,
                    pid: existing.pid,
                });
            }
            debug!(target_id = %target.id, %label, pid = existing.pid, "Previous run has exited; starting again");
            session.processes.remove(&label);
        }

        let launcher = match script.extension() {
            Some("py") => {
                let env = environment::ensure_in_session(
                    &self.executor,
                    target,
                    &mut session,
                    &self.discovery,
                    self.timeouts.environment,
                )
                .await?;
                Some(format!("{} -u", python_invocation(&env)))
            }
            Some("sh") => Some("sh".to_string()),
            Some("bash") => Some("bash".to_string()),
            _ => None,
        };

        let log_path = script.with_name_suffix(".log");
        let (prepare, program) = match launcher {
            Some(launcher) => (String::new(), format!("{launcher} {}", script.to_shell())),
            None => (
                format!("chmod +x -- {} || exit 1\n", script.to_shell()),
                script.to_shell(),
            ),
        };
        let command = format!(
            "cd {dir} || exit 1\n\
             [ -f {p} ] || {{ echo 'No such file' >&2; exit 1; }}\n\
             {prepare}nohup {program} > {log} 2>&1 < /dev/null &\n\
             echo $!",
            dir = script.parent().to_shell(),
            p = script.to_shell(),
            log = log_path.to_shell(),
        );

        let result = self
            .executor
            .execute(target, &command, self.timeouts.file_ops)
            .await?;
        if !result.success {
            return Err(EngineError::remote_failure(result.exit_code, result.stderr));
        }
        let pid = result
            .stdout
            .lines()
            .rev()
            .find_map(|l| l.trim().parse::<u32>().ok())
            .ok_or_else(|| {
                EngineError::remote_failure(result.exit_code, "background launch printed no PID")
            })?;

        let process = BackgroundProcess {
            label: label.clone(),
            pid,
            log_path,
            started_at: Utc::now(),
        };
        session.processes.insert(label, process.clone());
        info!(target_id = %target.id, label = %process.label, pid, "Started background process");
        Ok(process)
    }

    pub async fn stop_background(&self, target: &Target, label: &str) -> Result<StopOutcome> {
        let mut session = self.sessions.begin(&target.id).await;
        let process = session
            .processes
            .get(label)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("process '{label}'")))?;

        let result = self
            .executor
            .execute(target, &format!("kill {}", process.pid), self.timeouts.file_ops)
            .await?;

        let signalled = if result.success {
            true
        } else if result.stderr.contains("No such process") {
            false
        } else {
            return Err(EngineError::remote_failure(result.exit_code, result.stderr));
        };

        session.processes.remove(label);
        info!(target_id = %target.id, label, pid = process.pid, signalled, "Stopped background process");
        Ok(StopOutcome {
            label: label.to_string(),
            pid: process.pid,
            signalled,
        })
    }

    /// Tracked processes that are still alive; exited ones are dropped from
    /// the registry.
    pub async fn list_background(&self, target: &Target) -> Result<Vec<BackgroundProcess>> {
        let mut session = self.sessions.begin(&target.id).await;
        if session.processes.is_empty() {
            return Ok(Vec::new());
        }

        let pids: Vec<u32> = session.processes.values().map(|p| p.pid).collect();
        let alive = self.live_pids(target, &pids).await?;

        session.processes.retain(|label, process| {
            let running = alive.contains(&process.pid);
            if !running {
                debug!(target_id = %target.id, label, pid = process.pid, "Background process exited");
            }
            running
        });
        Ok(session.processes.values().cloned().collect())
    }

    /// The subset of `pids` still running. Zombies count as exited.
    async fn live_pids(&self, target: &Target, pids: &[u32]) -> Result<Vec<u32>> {
        let list: Vec<String> = pids.iter().map(u32::to_string).collect();
        let command = format!(
            "for pid in {}; do\n\
             kill -0 \"$pid\" 2>/dev/null || continue\n\
             state=$(sed -n 's/^.*) \\(.\\).*/\\1/p' \"/proc/$pid/stat\" 2>/dev/null)\n\
             [ \"$state\" = Z ] || echo \"$pid\"\n\
             done",
            list.join(" ")
        );
        let result = self
            .executor
            .execute(target, &command, self.timeouts.file_ops)
            .await?;
        Ok(result
            .stdout
            .lines()
            .filter_map(|l| l.trim().parse().ok())
            .collect())
    }

    /// One resource sample. Does not take the session lock.
    pub async fn detailed_stats(&self, target: &Target) -> Result<DetailedStats> {
        match &target.kind {
            TargetKind::Open(_) => {
                let result = self
                    .executor
                    .execute(target, stats::OPEN_SAMPLE, self.timeouts.stats)
                    .await?;
                Ok(stats::parse_open_sample(&result.stdout))
            }
            TargetKind::Sandboxed(host) => {
                let result = self
                    .executor
                    .execute(target, stats::JAILED_SAMPLE, self.timeouts.stats)
                    .await?;
                Ok(stats::jailed_stats(&result.stdout, &host.limits))
            }
        }
    }

    /// Runs `true` on the target. Does not touch the session.
    pub async fn check_connection(&self, target: &Target) -> Result<ConnectionCheck> {
        let started = Instant::now();
        let result = self
            .executor
            .execute(target, "true", self.timeouts.stats)
            .await?;
        if !result.success {
            return Err(EngineError::RemoteCommandFailure {
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(target_id = %target.id, latency_ms, "Connection check passed");
        Ok(ConnectionCheck { latency_ms })
    }

    pub async fn history(&self, target_id: &str) -> Vec<String> {
        self.sessions.begin(target_id).await.history.entries()
    }

    pub async fn session_info(&self, target_id: &str) -> SessionSnapshot {
        self.sessions.begin(target_id).await.snapshot()
    }

    /// Forgets the session. Remote processes keep running.
    pub fn close_session(&self, target_id: &str) -> bool {
        self.sessions.remove(target_id)
    }
}
