//! # Package Environment Manager
//!
//! Installs Python packages into a managed environment on the target.
//!
//! Every install follows the same steps under the session lock:
//!
//! 1. locate (or create) the environment, reusing the session's cached path;
//! 2. list what is already installed with `pip list --format=json`;
//! 3. install only the missing packages, in one installer run;
//! 4. classify the installer output into already-satisfied, newly-installed
//!    and failed packages.
//!
//! When every requested package is already present the installer is not run
//! at all and the report says so with `all_already_installed`. A run that
//! exits successfully without printing any recognizable marker is reported
//! as [`InstallOutcome::Unclear`], never as success.

pub mod classify;
pub mod environment;
pub mod manifest;

pub use environment::DiscoveryConfig;
pub use manifest::{Requirement, normalize_name, parse_manifest};

use crate::engine::ShellSessionEngine;
use crate::error::{EngineError, Result};
use crate::path_resolver::{PathExpr, resolve};
use crate::session::ActiveSession;
use crate::shell_syntax::quote;
use crate::target::Target;
use classify::scan_installer_output;
use environment::pip_invocation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A named bundle of packages offered in the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagePreset {
    pub id: String,
    pub name: String,
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    AllAlreadyInstalled,
    Installed,
    PartiallyFailed,
    Failed,
    Unclear,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub outcome: InstallOutcome,
    pub all_already_installed: bool,
    pub environment: PathExpr,
    pub already_installed: Vec<String>,
    pub installed: Vec<String>,
    pub failed: Vec<String>,
    /// Requested, installer exited cleanly, but no marker mentioned them.
    pub unconfirmed: Vec<String>,
    /// `ERROR:` lines from the installer.
    pub errors: Vec<String>,
    /// Combined installer output; empty when the installer was not run.
    pub output: String,
}

impl InstallReport {
    pub fn succeeded(&self) -> bool {
        matches!(
            self.outcome,
            InstallOutcome::AllAlreadyInstalled | InstallOutcome::Installed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UninstallReport {
    pub package: String,
    pub output: String,
}

pub struct PackageEnvironmentManager {
    engine: Arc<ShellSessionEngine>,
    presets: Vec<PackagePreset>,
}

impl PackageEnvironmentManager {
    pub fn new(engine: Arc<ShellSessionEngine>, presets: Vec<PackagePreset>) -> Self {
        Self { engine, presets }
    }

    pub fn presets(&self) -> &[PackagePreset] {
        &self.presets
    }

    /// Locates or creates the environment and caches it on the session.
    pub async fn ensure_environment(&self, target: &Target) -> Result<PathExpr> {
        let mut session = self.engine.sessions().begin(&target.id).await;
        self.ensure_locked(target, &mut session).await
    }

    async fn ensure_locked(&self, target: &Target, session: &mut ActiveSession) -> Result<PathExpr> {
        environment::ensure_in_session(
            self.engine.executor(),
            target,
            session,
            self.engine.discovery(),
            self.engine.timeouts().environment,
        )
        .await
    }

    pub async fn installed_packages(&self, target: &Target) -> Result<Vec<InstalledPackage>> {
        let mut session = self.engine.sessions().begin(&target.id).await;
        let environment = self.ensure_locked(target, &mut session).await?;
        self.list_installed(target, &environment).await
    }

    async fn list_installed(
        &self,
        target: &Target,
        environment: &PathExpr,
    ) -> Result<Vec<InstalledPackage>> {
        let command = format!(
            "{} list --format=json --disable-pip-version-check 2>/dev/null",
            pip_invocation(environment)
        );
        let result = self
            .engine
            .executor()
            .execute(target, &command, self.engine.timeouts().exec)
            .await?;
        if !result.success {
            return Err(EngineError::remote_failure(result.exit_code, result.stderr));
        }
        serde_json::from_str(result.stdout.trim()).map_err(|e| {
            EngineError::remote_failure(result.exit_code, format!("unreadable package list: {e}"))
        })
    }

    /// Installs the named packages, skipping those already present.
    pub async fn install(
        &self,
        target: &Target,
        names: &[String],
        timeout: Option<Duration>,
    ) -> Result<InstallReport> {
        let requirements = names
            .iter()
            .map(|n| Requirement::parse(n))
            .collect::<Result<Vec<_>>>()?;
        if requirements.is_empty() {
            return Err(EngineError::InvalidInput("no packages requested".to_string()));
        }

        let mut session = self.engine.sessions().begin(&target.id).await;
        self.install_locked(target, &mut session, &requirements, timeout)
            .await
    }

    /// Reads a manifest file on the target and installs what it lists.
    pub async fn install_from_manifest(
        &self,
        target: &Target,
        manifest_path: &str,
        timeout: Option<Duration>,
    ) -> Result<InstallReport> {
        let mut session = self.engine.sessions().begin(&target.id).await;
        let path = resolve(&session.current_directory, manifest_path, target.policy())?;
        let command = format!("cat -- {}", path.to_shell());
        let result = self
            .engine
            .executor()
            .execute(target, &command, self.engine.timeouts().file_ops)
            .await?;
        if !result.success {
            return Err(EngineError::remote_failure(result.exit_code, result.stderr));
        }

        let requirements = parse_manifest(&result.stdout);
        if requirements.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "{path} lists no installable packages"
            )));
        }
        self.install_locked(target, &mut session, &requirements, timeout)
            .await
    }

    pub async fn install_preset(
        &self,
        target: &Target,
        preset_id: &str,
        timeout: Option<Duration>,
    ) -> Result<InstallReport> {
        let preset = self
            .presets
            .iter()
            .find(|p| p.id == preset_id)
            .ok_or_else(|| EngineError::NotFound(format!("preset '{preset_id}'")))?;
        self.install(target, &preset.packages, timeout).await
    }

    async fn install_locked(
        &self,
        target: &Target,
        session: &mut ActiveSession,
        requirements: &[Requirement],
        timeout: Option<Duration>,
    ) -> Result<InstallReport> {
        let environment = self.ensure_locked(target, session).await?;
        let present: BTreeSet<String> = self
            .list_installed(target, &environment)
            .await?
            .into_iter()
            .map(|p| normalize_name(&p.name))
            .collect();

        let (already, missing): (Vec<&Requirement>, Vec<&Requirement>) =
            requirements.iter().partition(|r| present.contains(&r.name));
        let already_installed: Vec<String> = already.iter().map(|r| r.name.clone()).collect();

        if missing.is_empty() {
            info!(target_id = %target.id, count = already_installed.len(), "All requested packages already installed");
            return Ok(InstallReport {
                outcome: InstallOutcome::AllAlreadyInstalled,
                all_already_installed: true,
                environment,
                already_installed,
                installed: Vec::new(),
                failed: Vec::new(),
                unconfirmed: Vec::new(),
                errors: Vec::new(),
                output: String::new(),
            });
        }

        let specs: Vec<String> = missing.iter().map(|r| quote(&r.spec)).collect();
        let command = format!(
            "{} install --disable-pip-version-check {}",
            pip_invocation(&environment),
            specs.join(" ")
        );
        let timeout = timeout.unwrap_or(self.engine.timeouts().install);
        info!(target_id = %target.id, packages = missing.len(), "Running package installer");
        let result = self
            .engine
            .executor()
            .execute(target, &command, timeout)
            .await?;

        let output = result.combined_output();
        let markers = scan_installer_output(&output);
        if markers.is_empty() {
            debug!(target_id = %target.id, exit_code = result.exit_code, "Installer output has no recognised markers");
        }
        let report = build_report(
            environment,
            already_installed,
            &missing,
            result.exit_code,
            markers,
            output,
        );
        if !report.succeeded() {
            warn!(target_id = %target.id, outcome = ?report.outcome, failed = ?report.failed, "Package installation did not fully succeed");
        }
        Ok(report)
    }

    pub async fn uninstall(&self, target: &Target, name: &str) -> Result<UninstallReport> {
        let requirement = Requirement::parse(name)?;
        let mut session = self.engine.sessions().begin(&target.id).await;
        let environment = self.ensure_locked(target, &mut session).await?;

        let command = format!(
            "{} uninstall -y --disable-pip-version-check {}",
            pip_invocation(&environment),
            quote(&requirement.name)
        );
        let result = self
            .engine
            .executor()
            .execute(target, &command, self.engine.timeouts().install)
            .await?;
        let output = result.combined_output();

        if output.contains("Successfully uninstalled") {
            Ok(UninstallReport {
                package: requirement.name,
                output,
            })
        } else if output.contains("not installed") {
            Err(EngineError::NotFound(format!("package '{}'", requirement.name)))
        } else if !result.success {
            Err(EngineError::remote_failure(result.exit_code, output))
        } else {
            Err(EngineError::AmbiguousInstallOutcome)
        }
    }
}

fn build_report(
    environment: PathExpr,
    mut already_installed: Vec<String>,
    missing: &[&Requirement],
    exit_code: i32,
    markers: classify::InstallerMarkers,
    output: String,
) -> InstallReport {
    let mut installed = Vec::new();
    let mut unaccounted = Vec::new();
    for requirement in missing {
        if markers.installed.contains(&requirement.name) {
            installed.push(requirement.name.clone());
        } else if markers.already_satisfied.contains(&requirement.name) {
            already_installed.push(requirement.name.clone());
        } else {
            unaccounted.push(requirement.name.clone());
        }
    }

    let installer_failed = exit_code != 0 || !markers.errors.is_empty();
    let (failed, unconfirmed) = if installer_failed {
        (unaccounted, Vec::new())
    } else {
        (Vec::new(), unaccounted)
    };

    let outcome = if !failed.is_empty() && !installed.is_empty() {
        InstallOutcome::PartiallyFailed
    } else if !failed.is_empty() {
        InstallOutcome::Failed
    } else if !unconfirmed.is_empty() {
        InstallOutcome::Unclear
    } else {
        InstallOutcome::Installed
    };

    InstallReport {
        outcome,
        all_already_installed: false,
        environment,
        already_installed,
        installed,
        failed,
        unconfirmed,
        errors: markers.errors,
        output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reqs(names: &[&str]) -> Vec<Requirement> {
        names.iter().filter_map(|n| Requirement::parse(n).ok()).collect()
    }

    fn report(missing: &[&str], exit_code: i32, output: &str) -> InstallReport {
        let missing = reqs(missing);
        let refs: Vec<&Requirement> = missing.iter().collect();
        build_report(
            PathExpr::HomeRelative("venv".into()),
            Vec::new(),
            &refs,
            exit_code,
            scan_installer_output(output),
            output.to_string(),
        )
    }

    #[test]
    fn success_marker_means_installed() {
        let r = report(&["requests"], 0, "Successfully installed requests-2.31.0\n");
        assert_eq!(r.outcome, InstallOutcome::Installed);
        assert_eq!(r.installed, vec!["requests"]);
        assert!(r.failed.is_empty());
    }

    #[test]
    fn error_lines_fail_the_unaccounted_packages() {
        let r = report(
            &["requests", "nosuchpkg"],
            1,
            "Successfully installed requests-2.31.0\nERROR: No matching distribution found for nosuchpkg\n",
        );
        assert_eq!(r.outcome, InstallOutcome::PartiallyFailed);
        assert_eq!(r.failed, vec!["nosuchpkg"]);

        let all_failed = report(&["nosuchpkg"], 1, "ERROR: nope\n");
        assert_eq!(all_failed.outcome, InstallOutcome::Failed);
    }

    #[test]
    fn zero_exit_without_markers_is_unclear() {
        let r = report(&["requests"], 0, "Looking in indexes: https://pypi.org/simple\n");
        assert_eq!(r.outcome, InstallOutcome::Unclear);
        assert!(!r.succeeded());
        assert!(r.installed.is_empty() && r.failed.is_empty());
        assert_eq!(r.unconfirmed, vec!["requests"]);
    }

    #[test]
    fn nonzero_exit_without_markers_fails_everything() {
        let r = report(&["a", "b"], 2, "Killed\n");
        assert_eq!(r.outcome, InstallOutcome::Failed);
        assert_eq!(r.failed, vec!["a", "b"]);
    }

    #[test]
    fn requirement_already_satisfied_counts_as_present() {
        let r = report(&["flask"], 0, "Requirement already satisfied: flask in ./venv\n");
        assert_eq!(r.outcome, InstallOutcome::Installed);
        assert_eq!(r.already_installed, vec!["flask"]);
    }
}
