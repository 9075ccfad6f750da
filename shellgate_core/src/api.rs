//! # Console API
//!
//! The surface the web layer talks to. Every method takes an already
//! authorized [`Target`], never fails, and returns a serializable response
//! whose free-text fields (stdout, stderr, messages) have been through the
//! [`Redactor`]. Errors are reported in-band as `success: false` plus a stable
//! [`ErrorKind`].
//!
//! Structured path fields and file contents are returned as-is: paths are
//! symbolic (`~/...`) and contents are the user's own data.

use crate::engine::{ShellSessionEngine, StopOutcome};
use crate::error::{EngineError, ErrorKind};
use crate::listing::DirEntry;
use crate::packages::{
    InstallOutcome, InstallReport, InstalledPackage, PackageEnvironmentManager, PackagePreset,
};
use crate::path_resolver::PathExpr;
use crate::redact::Redactor;
use crate::session::{BackgroundProcess, SessionSnapshot};
use crate::stats::DetailedStats;
use crate::target::Target;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecResponse {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub current_directory: Option<PathExpr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CdResponse {
    pub success: bool,
    pub new_directory: Option<PathExpr>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListResponse {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub path: Option<PathExpr>,
    pub entries: Vec<DirEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadFileResponse {
    pub success: bool,
    pub content: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Result of write, create, rename, delete and upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathExpr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    pub files: Vec<String>,
    pub count: usize,
    pub truncated: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Metrics are `null` when the sample could not measure them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsResponse {
    pub success: bool,
    #[serde(flatten)]
    pub stats: DetailedStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResponse {
    pub success: bool,
    pub process: Option<BackgroundProcess>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopResponse {
    pub success: bool,
    pub stopped: Option<StopOutcome>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessListResponse {
    pub success: bool,
    pub processes: Vec<BackgroundProcess>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionResponse {
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryResponse {
    pub history: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseSessionResponse {
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageListResponse {
    pub success: bool,
    pub environment: Option<PathExpr>,
    pub packages: Vec<InstalledPackage>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallResponse {
    pub success: bool,
    pub message: String,
    pub report: Option<InstallReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UninstallResponse {
    pub success: bool,
    pub message: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

pub struct ConsoleApi {
    engine: Arc<ShellSessionEngine>,
    packages: Arc<PackageEnvironmentManager>,
    redactor: Redactor,
}

impl ConsoleApi {
    pub fn new(
        engine: Arc<ShellSessionEngine>,
        packages: Arc<PackageEnvironmentManager>,
        redactor: Redactor,
    ) -> Self {
        Self {
            engine,
            packages,
            redactor,
        }
    }

    pub fn engine(&self) -> &Arc<ShellSessionEngine> {
        &self.engine
    }

    /// Logs the full error and returns the redacted user message.
    fn failure(&self, target: &Target, operation: &str, error: &EngineError) -> (String, ErrorKind) {
        warn!(target_id = %target.id, operation, kind = ?error.kind(), "{}", error);
        (self.redactor.redact(&error.user_message()), error.kind())
    }

    pub async fn exec(&self, target: &Target, command: &str, timeout_secs: Option<u64>) -> ExecResponse {
        let timeout = timeout_secs.map(Duration::from_secs);
        match self.engine.exec(target, command, timeout).await {
            Ok(outcome) => ExecResponse {
                success: outcome.success,
                exit_code: outcome.exit_code,
                stdout: self.redactor.redact(&outcome.stdout),
                stderr: self.redactor.redact(&outcome.stderr),
                current_directory: Some(outcome.current_directory),
                error_kind: None,
            },
            Err(e) => {
                let (message, kind) = self.failure(target, "exec", &e);
                let exit_code = match &e {
                    EngineError::RemoteCommandFailure { exit_code, .. } => *exit_code,
                    _ => -1,
                };
                ExecResponse {
                    success: false,
                    exit_code,
                    stdout: String::new(),
                    stderr: message,
                    current_directory: None,
                    error_kind: Some(kind),
                }
            }
        }
    }

    pub async fn cd(&self, target: &Target, path: &str) -> CdResponse {
        match self.engine.cd(target, path).await {
            Ok(outcome) => CdResponse {
                success: true,
                new_directory: Some(outcome.new_directory),
                message: "Directory changed".to_string(),
                error_kind: None,
            },
            Err(e) => {
                let (message, kind) = self.failure(target, "cd", &e);
                CdResponse {
                    success: false,
                    new_directory: None,
                    message,
                    error_kind: Some(kind),
                }
            }
        }
    }

    pub async fn ls(&self, target: &Target, path: &str) -> ListResponse {
        match self.engine.ls(target, path).await {
            Ok(listing) => ListResponse {
                code: listing.code,
                stdout: self.redactor.redact(&listing.stdout),
                stderr: self.redactor.redact(&listing.stderr),
                path: Some(listing.path),
                entries: listing.entries,
                error_kind: None,
            },
            Err(e) => {
                let (message, kind) = self.failure(target, "ls", &e);
                ListResponse {
                    code: -1,
                    stdout: String::new(),
                    stderr: message,
                    path: None,
                    entries: Vec::new(),
                    error_kind: Some(kind),
                }
            }
        }
    }

    pub async fn read_file(&self, target: &Target, path: &str) -> ReadFileResponse {
        match self.engine.read_file(target, path).await {
            Ok(content) => ReadFileResponse {
                success: true,
                content: Some(content),
                message: "File read".to_string(),
                error_kind: None,
            },
            Err(e) => {
                let (message, kind) = self.failure(target, "read_file", &e);
                ReadFileResponse {
                    success: false,
                    content: None,
                    message,
                    error_kind: Some(kind),
                }
            }
        }
    }

    fn action(
        &self,
        target: &Target,
        operation: &str,
        result: crate::error::Result<PathExpr>,
        done: &str,
    ) -> ActionResponse {
        match result {
            Ok(path) => ActionResponse {
                success: true,
                message: done.to_string(),
                path: Some(path),
                error_kind: None,
            },
            Err(e) => {
                let (message, kind) = self.failure(target, operation, &e);
                ActionResponse {
                    success: false,
                    message,
                    path: None,
                    error_kind: Some(kind),
                }
            }
        }
    }

    pub async fn write_file(&self, target: &Target, path: &str, content: &str) -> ActionResponse {
        let result = self.engine.write_file(target, path, content).await;
        self.action(target, "write_file", result, "File saved")
    }

    pub async fn create_file(&self, target: &Target, path: &str) -> ActionResponse {
        let result = self.engine.create_file(target, path).await;
        self.action(target, "create_file", result, "File created")
    }

    pub async fn create_directory(&self, target: &Target, path: &str) -> ActionResponse {
        let result = self.engine.create_directory(target, path).await;
        self.action(target, "create_directory", result, "Directory created")
    }

    pub async fn rename(&self, target: &Target, old_path: &str, new_path: &str) -> ActionResponse {
        let result = self.engine.rename(target, old_path, new_path).await;
        self.action(target, "rename", result, "Renamed")
    }

    pub async fn delete(&self, target: &Target, path: &str) -> ActionResponse {
        let result = self.engine.delete(target, path).await;
        self.action(target, "delete", result, "Deleted")
    }

    pub async fn upload(
        &self,
        target: &Target,
        remote_path: &str,
        file_name: Option<&str>,
        contents: &[u8],
    ) -> ActionResponse {
        let result = self
            .engine
            .upload(target, remote_path, file_name, contents)
            .await;
        self.action(target, "upload", result, "File uploaded")
    }

    pub async fn search(
        &self,
        target: &Target,
        search_path: &str,
        pattern: &str,
        max_results: Option<usize>,
    ) -> SearchResponse {
        match self
            .engine
            .search(target, search_path, pattern, max_results)
            .await
        {
            Ok(outcome) => {
                let count = outcome.files.len();
                SearchResponse {
                    success: true,
                    message: format!("Found {count} files"),
                    files: outcome.files,
                    count,
                    truncated: outcome.truncated,
                    error_kind: None,
                }
            }
            Err(e) => {
                let (message, kind) = self.failure(target, "search", &e);
                SearchResponse {
                    success: false,
                    files: Vec::new(),
                    count: 0,
                    truncated: false,
                    message,
                    error_kind: Some(kind),
                }
            }
        }
    }

    pub async fn detailed_stats(&self, target: &Target) -> StatsResponse {
        match self.engine.detailed_stats(target).await {
            Ok(stats) => StatsResponse {
                success: true,
                stats,
                message: None,
                error_kind: None,
            },
            Err(e) => {
                let (message, kind) = self.failure(target, "detailed_stats", &e);
                StatsResponse {
                    success: false,
                    stats: DetailedStats::default(),
                    message: Some(message),
                    error_kind: Some(kind),
                }
            }
        }
    }

    pub async fn run_background(&self, target: &Target, path: &str) -> RunResponse {
        match self.engine.run_background(target, path).await {
            Ok(process) => RunResponse {
                success: true,
                message: format!("Started {} (pid {})", process.label, process.pid),
                process: Some(process),
                error_kind: None,
            },
            Err(e) => {
                let (message, kind) = self.failure(target, "run_background", &e);
                RunResponse {
                    success: false,
                    process: None,
                    message,
                    error_kind: Some(kind),
                }
            }
        }
    }

    pub async fn stop_background(&self, target: &Target, label: &str) -> StopResponse {
        match self.engine.stop_background(target, label).await {
            Ok(outcome) => StopResponse {
                success: true,
                message: if outcome.signalled {
                    format!("Stopped {}", outcome.label)
                } else {
                    format!("{} had already exited", outcome.label)
                },
                stopped: Some(outcome),
                error_kind: None,
            },
            Err(e) => {
                let (message, kind) = self.failure(target, "stop_background", &e);
                StopResponse {
                    success: false,
                    stopped: None,
                    message,
                    error_kind: Some(kind),
                }
            }
        }
    }

    pub async fn list_background(&self, target: &Target) -> ProcessListResponse {
        match self.engine.list_background(target).await {
            Ok(processes) => ProcessListResponse {
                success: true,
                message: format!("{} running", processes.len()),
                processes,
                error_kind: None,
            },
            Err(e) => {
                let (message, kind) = self.failure(target, "list_background", &e);
                ProcessListResponse {
                    success: false,
                    processes: Vec::new(),
                    message,
                    error_kind: Some(kind),
                }
            }
        }
    }

    pub async fn check_connection(&self, target: &Target) -> ConnectionResponse {
        match self.engine.check_connection(target).await {
            Ok(check) => ConnectionResponse {
                success: true,
                latency_ms: Some(check.latency_ms),
                message: "Connection OK".to_string(),
                error_kind: None,
            },
            Err(e) => {
                let (message, kind) = self.failure(target, "check_connection", &e);
                ConnectionResponse {
                    success: false,
                    latency_ms: None,
                    message,
                    error_kind: Some(kind),
                }
            }
        }
    }

    pub async fn history(&self, target: &Target) -> HistoryResponse {
        HistoryResponse {
            history: self.engine.history(&target.id).await,
        }
    }

    pub async fn session_info(&self, target: &Target) -> SessionSnapshot {
        self.engine.session_info(&target.id).await
    }

    pub fn close_session(&self, target: &Target) -> CloseSessionResponse {
        CloseSessionResponse {
            closed: self.engine.close_session(&target.id),
        }
    }

    pub fn presets(&self) -> &[PackagePreset] {
        self.packages.presets()
    }

    pub async fn installed_packages(&self, target: &Target) -> PackageListResponse {
        let listed = async {
            let environment = self.packages.ensure_environment(target).await?;
            let packages = self.packages.installed_packages(target).await?;
            Ok::<_, EngineError>((environment, packages))
        }
        .await;
        match listed {
            Ok((environment, packages)) => PackageListResponse {
                success: true,
                message: format!("{} packages installed", packages.len()),
                environment: Some(environment),
                packages,
                error_kind: None,
            },
            Err(e) => {
                let (message, kind) = self.failure(target, "installed_packages", &e);
                PackageListResponse {
                    success: false,
                    environment: None,
                    packages: Vec::new(),
                    message,
                    error_kind: Some(kind),
                }
            }
        }
    }

    pub async fn install(
        &self,
        target: &Target,
        names: &[String],
        timeout_secs: Option<u64>,
    ) -> InstallResponse {
        let timeout = timeout_secs.map(Duration::from_secs);
        let result = self.packages.install(target, names, timeout).await;
        self.install_response(target, "install", result)
    }

    pub async fn install_from_manifest(
        &self,
        target: &Target,
        manifest_path: &str,
        timeout_secs: Option<u64>,
    ) -> InstallResponse {
        let timeout = timeout_secs.map(Duration::from_secs);
        let result = self
            .packages
            .install_from_manifest(target, manifest_path, timeout)
            .await;
        self.install_response(target, "install_manifest", result)
    }

    pub async fn install_preset(
        &self,
        target: &Target,
        preset_id: &str,
        timeout_secs: Option<u64>,
    ) -> InstallResponse {
        let timeout = timeout_secs.map(Duration::from_secs);
        let result = self.packages.install_preset(target, preset_id, timeout).await;
        self.install_response(target, "install_preset", result)
    }

    fn install_response(
        &self,
        target: &Target,
        operation: &str,
        result: crate::error::Result<InstallReport>,
    ) -> InstallResponse {
        let mut report = match result {
            Ok(report) => report,
            Err(e) => {
                let (message, kind) = self.failure(target, operation, &e);
                return InstallResponse {
                    success: false,
                    message,
                    report: None,
                    error_kind: Some(kind),
                };
            }
        };

        report.output = self.redactor.redact(&report.output);
        report.errors = report.errors.iter().map(|e| self.redactor.redact(e)).collect();

        let (message, error_kind) = match report.outcome {
            InstallOutcome::AllAlreadyInstalled => {
                ("All packages are already installed".to_string(), None)
            }
            InstallOutcome::Installed => (
                format!("Installed {} packages", report.installed.len()),
                None,
            ),
            InstallOutcome::PartiallyFailed => (
                format!("Failed to install: {}", report.failed.join(", ")),
                Some(ErrorKind::RemoteCommandFailure),
            ),
            InstallOutcome::Failed => (
                "Installation failed".to_string(),
                Some(ErrorKind::RemoteCommandFailure),
            ),
            InstallOutcome::Unclear => {
                let error = EngineError::AmbiguousInstallOutcome;
                (error.to_string(), Some(error.kind()))
            }
        };

        InstallResponse {
            success: report.succeeded(),
            message,
            report: Some(report),
            error_kind,
        }
    }

    pub async fn uninstall(&self, target: &Target, name: &str) -> UninstallResponse {
        match self.packages.uninstall(target, name).await {
            Ok(report) => UninstallResponse {
                success: true,
                message: format!("Uninstalled {}", report.package),
                output: self.redactor.redact(&report.output),
                error_kind: None,
            },
            Err(e) => {
                let (message, kind) = self.failure(target, "uninstall", &e);
                UninstallResponse {
                    success: false,
                    message,
                    output: String::new(),
                    error_kind: Some(kind),
                }
            }
        }
    }
}
