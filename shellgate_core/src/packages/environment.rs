//! Locating or creating the Python environment a target's packages go into.
//!
//! Discovery is one composed shell command so a cold lookup costs a single
//! round trip. It prints the environment's physical path and the physical
//! home directory, which are mapped back to a symbolic [`PathExpr`].

use crate::error::{EngineError, Result};
use crate::executor::RemoteExecutor;
use crate::path_resolver::{PathExpr, PathPolicy, canonicalize};
use crate::session::SessionState;
use crate::shell_syntax::quote;
use crate::target::Target;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Directory under `~` created when nothing is found.
    pub venv_dir: String,
    /// Searched, in order, after `~` on open targets.
    pub search_roots: Vec<String>,
    pub max_depth: u32,
    /// Fall back to a shallow search from `/` on open targets.
    pub search_filesystem_root: bool,
    pub root_max_depth: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            venv_dir: "venv".to_string(),
            search_roots: vec!["/opt".into(), "/usr/local".into(), "/srv".into()],
            max_depth: 4,
            search_filesystem_root: true,
            root_max_depth: 3,
        }
    }
}

/// `<env>/bin/python -m pip`
pub fn pip_invocation(environment: &PathExpr) -> String {
    format!("{} -m pip", environment.join("bin/python").to_shell())
}

pub fn python_invocation(environment: &PathExpr) -> String {
    environment.join("bin/python").to_shell()
}

/// Builds the locate-or-create command.
pub fn discovery_command(
    cached: Option<&PathExpr>,
    policy: PathPolicy,
    config: &DiscoveryConfig,
) -> String {
    let venv = PathExpr::Home.join(&config.venv_dir);
    let mut script = String::from(
        "home=$(cd ~ && pwd -P) || exit 1\n\
         emit() { printf '%s\\n%s\\n' \"$1\" \"$home\"; exit 0; }\n",
    );

    if let Some(cached) = cached {
        script.push_str(&format!(
            "if [ -x {python} ]; then emit \"$(cd {dir} && pwd -P)\"; fi\n",
            python = python_invocation(cached),
            dir = cached.to_shell(),
        ));
    }

    script.push_str(&format!(
        "for d in \"$home\"/{venv} \"$home\"/.venv; do [ -f \"$d/pyvenv.cfg\" ] && emit \"$d\"; done\n",
        venv = quote(&config.venv_dir),
    ));

    if policy == PathPolicy::Open {
        let mut roots = String::from("\"$home\"");
        for root in &config.search_roots {
            roots.push(' ');
            roots.push_str(&quote(root));
        }
        script.push_str(&format!(
            "for base in {roots}; do\n\
             [ -d \"$base\" ] || continue\n\
             cfg=$(find \"$base\" -maxdepth {depth} -name pyvenv.cfg -type f 2>/dev/null | head -n 1)\n\
             [ -n \"$cfg\" ] && emit \"$(dirname \"$cfg\")\"\n\
             done\n",
            depth = config.max_depth,
        ));
        if config.search_filesystem_root {
            script.push_str(&format!(
                "cfg=$(find / -maxdepth {depth} -name pyvenv.cfg -type f 2>/dev/null | head -n 1)\n\
                 [ -n \"$cfg\" ] && emit \"$(dirname \"$cfg\")\"\n",
                depth = config.root_max_depth,
            ));
        }
    }

    script.push_str(&format!(
        "python3 -m venv {venv} >&2 || {{ echo 'could not create a virtual environment with python3 -m venv' >&2; exit 1; }}\n\
         emit \"$home\"/{name}",
        venv = venv.to_shell(),
        name = quote(&config.venv_dir),
    ));
    script
}

/// Parses the two-line output of [`discovery_command`].
pub fn parse_discovery(stdout: &str, policy: PathPolicy) -> Option<PathExpr> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let environment = lines.next()?;
    let home = lines.next()?;
    Some(canonicalize(environment, home, policy))
}

/// Returns the session's environment, discovering or creating it when the
/// cache is empty or stale. Must be called with the session locked.
pub async fn ensure_in_session(
    executor: &RemoteExecutor,
    target: &Target,
    session: &mut SessionState,
    config: &DiscoveryConfig,
    timeout: Duration,
) -> Result<PathExpr> {
    let policy = target.policy();
    let command = discovery_command(session.environment.as_ref(), policy, config);
    let result = executor.execute(target, &command, timeout).await?;

    if !result.success {
        session.environment = None;
        return Err(EngineError::EnvironmentUnavailable(
            result.stderr.trim().to_string(),
        ));
    }

    let environment = parse_discovery(&result.stdout, policy).ok_or_else(|| {
        EngineError::EnvironmentUnavailable("environment lookup printed no path".to_string())
    })?;

    if session.environment.as_ref() != Some(&environment) {
        info!(target_id = %target.id, environment = %environment, "Using Python environment");
    } else {
        debug!(target_id = %target.id, "Cached Python environment still valid");
    }
    session.environment = Some(environment.clone());
    Ok(environment)
}
