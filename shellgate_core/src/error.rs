//! Error types for the session engine.
//!
//! Two layers are kept apart: a [`TransportError`] means the remote shell
//! was never reached (or did not answer in time), while
//! [`EngineError::RemoteCommandFailure`] means the shell ran and reported a
//! failure. Nonzero exit codes from plain `exec` calls are not errors at all;
//! they come back as an ordinary [`crate::executor::CommandResult`].

use serde::Serialize;
use thiserror::Error;

/// Failure to reach or drive the remote shell.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection to target failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication with target failed: {0}")]
    AuthenticationFailed(String),

    #[error("Operation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Transport I/O error: {0}")]
    Io(String),

    #[error("Transport cannot serve this target: {0}")]
    Unsupported(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Structurally invalid path input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JailViolation {
    #[error("Path must not be empty")]
    EmptyPath,

    #[error("Path contains a NUL byte")]
    NulByte,

    #[error("Path {path} is outside the sandbox root")]
    OutsideRoot { path: String },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Invalid path: {0}")]
    JailViolation(#[from] JailViolation),

    #[error("Operation forbidden for safety: {reason}")]
    CommandBlocked { reason: String },

    #[error("Remote command failed with exit code {exit_code}: {stderr}")]
    RemoteCommandFailure { exit_code: i32, stderr: String },

    #[error("Package installation outcome could not be determined")]
    AmbiguousInstallOutcome,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Process '{label}' is already running with PID {pid}")]
    AlreadyRunning { label: String, pid: u32 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Python environment unavailable: {0}")]
    EnvironmentUnavailable(String),
}

impl EngineError {
    pub fn remote_failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        EngineError::RemoteCommandFailure {
            exit_code,
            stderr: stderr.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Transport(TransportError::Timeout { .. }) => ErrorKind::Timeout,
            EngineError::Transport(_) => ErrorKind::Transport,
            EngineError::JailViolation(_) => ErrorKind::InvalidPath,
            EngineError::CommandBlocked { .. } => ErrorKind::CommandBlocked,
            EngineError::RemoteCommandFailure { .. } => ErrorKind::RemoteCommandFailure,
            EngineError::AmbiguousInstallOutcome => ErrorKind::AmbiguousInstallOutcome,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::AlreadyRunning { .. } => ErrorKind::AlreadyRunning,
            EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
            EngineError::EnvironmentUnavailable(_) => ErrorKind::EnvironmentUnavailable,
        }
    }

    /// Text suitable for the user once redacted: for remote failures this is
    /// the remote stderr rather than the wrapper message.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::RemoteCommandFailure { stderr, .. } if !stderr.trim().is_empty() => {
                stderr.trim().to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Stable, serializable classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Timeout,
    InvalidPath,
    CommandBlocked,
    RemoteCommandFailure,
    AmbiguousInstallOutcome,
    NotFound,
    AlreadyRunning,
    InvalidInput,
    EnvironmentUnavailable,
}

pub type Result<T> = std::result::Result<T, EngineError>;
