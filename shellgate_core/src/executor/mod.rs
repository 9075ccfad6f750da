//! # Remote Execution
//!
//! The engine never talks to a machine directly. It hands a fully composed
//! shell command to a [`Transport`] together with a timeout and gets back an
//! exit code plus the two output streams. Directory state, quoting and policy
//! are all settled before this point; a transport only moves bytes.
//!
//! - [`OpenSshTransport`] drives the system OpenSSH client for open targets.
//! - [`JailedLocalTransport`] runs `/bin/sh` inside the jail root of an
//!   allocated server.
//! - [`TargetRouter`] picks between the two by target kind.
//!
//! No layer here retries. A call that times out or fails to connect is
//! reported once, as a [`TransportError`], and the caller decides what to do.

mod local;
mod process;
mod ssh;

pub use local::JailedLocalTransport;
pub use ssh::{OpenSshTransport, SshOptions};

use crate::error::TransportError;
use crate::path_resolver::PathExpr;
use crate::target::{Target, TargetKind};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of one remote shell invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            success: exit_code == 0,
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// stdout followed by stderr, for output that is parsed as a whole.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end_matches('\n'), self.stderr),
        }
    }
}

/// Capability to run a command on, and push a file to, a target.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        target: &Target,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, TransportError>;

    /// Writes `contents` to `destination`, creating missing parent
    /// directories and replacing any existing file.
    async fn upload(
        &self,
        target: &Target,
        destination: &PathExpr,
        contents: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError>;
}

/// Routes each call to the transport that can serve the target's kind.
pub struct TargetRouter {
    open: Arc<dyn Transport>,
    sandboxed: Arc<dyn Transport>,
}

impl TargetRouter {
    pub fn new(open: Arc<dyn Transport>, sandboxed: Arc<dyn Transport>) -> Self {
        Self { open, sandboxed }
    }

    fn pick(&self, target: &Target) -> &Arc<dyn Transport> {
        match target.kind {
            TargetKind::Open(_) => &self.open,
            TargetKind::Sandboxed(_) => &self.sandboxed,
        }
    }
}

#[async_trait]
impl Transport for TargetRouter {
    async fn execute(
        &self,
        target: &Target,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, TransportError> {
        self.pick(target).execute(target, command, timeout).await
    }

    async fn upload(
        &self,
        target: &Target,
        destination: &PathExpr,
        contents: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        self.pick(target)
            .upload(target, destination, contents, timeout)
            .await
    }
}

/// Thin wrapper around a transport that adds tracing and timing.
#[derive(Clone)]
pub struct RemoteExecutor {
    transport: Arc<dyn Transport>,
}

impl RemoteExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn execute(
        &self,
        target: &Target,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, TransportError> {
        let started = Instant::now();
        debug!(target_id = %target.id, command, "Dispatching command");

        let result = self.transport.execute(target, command, timeout).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(output) => debug!(
                target_id = %target.id,
                exit_code = output.exit_code,
                elapsed_ms,
                "Command finished"
            ),
            Err(e) => warn!(target_id = %target.id, elapsed_ms, error = %e, "Command failed to run"),
        }
        result
    }

    pub async fn upload(
        &self,
        target: &Target,
        destination: &PathExpr,
        contents: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let started = Instant::now();
        let result = self
            .transport
            .upload(target, destination, contents, timeout)
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => debug!(
                target_id = %target.id,
                destination = %destination,
                bytes = contents.len(),
                elapsed_ms,
                "Upload finished"
            ),
            Err(e) => warn!(target_id = %target.id, elapsed_ms, error = %e, "Upload failed"),
        }
        result
    }
}
