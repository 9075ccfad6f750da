//! Helpers shared by unit tests, the integration suites and the HTTP crate's
//! tests.

use crate::api::ConsoleApi;
use crate::engine::ShellSessionEngine;
use crate::error::TransportError;
use crate::executor::{CommandResult, JailedLocalTransport, Transport};
use crate::packages::PackageEnvironmentManager;
use crate::path_resolver::PathExpr;
use crate::redact::Redactor;
use crate::session::SessionStore;
use crate::target::{Credential, ResourceLimits, SandboxHost, SshEndpoint, Target};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

type Handler = dyn Fn(&str) -> Result<CommandResult, TransportError> + Send + Sync;

/// Scripted transport: answers every command through a closure and records
/// what it was asked to do.
pub struct FakeTransport {
    handler: Box<Handler>,
    commands: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(PathExpr, Vec<u8>)>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Result<CommandResult, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            commands: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every command takes `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Most commands that were ever running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every command exits 0 with `stdout`.
    pub fn succeeding(stdout: &str) -> Self {
        let stdout = stdout.to_string();
        Self::new(move |_| Ok(CommandResult::new(0, stdout.clone(), "")))
    }

    pub fn failing(error: fn() -> TransportError) -> Self {
        Self::new(move |_| Err(error()))
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last_command(&self) -> Option<String> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner).last().cloned()
    }

    pub fn uploads(&self) -> Vec<(PathExpr, Vec<u8>)> {
        self.uploads.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn execute(
        &self,
        _target: &Target,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandResult, TransportError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.commands.lock().unwrap_or_else(PoisonError::into_inner).push(command.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = (self.handler)(command);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn upload(
        &self,
        _target: &Target,
        destination: &PathExpr,
        contents: &[u8],
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((destination.clone(), contents.to_vec()));
        Ok(())
    }
}

pub fn open_target(id: &str) -> Target {
    Target::open(
        id,
        SshEndpoint {
            host: "203.0.113.10".to_string(),
            port: 22,
            username: "deploy".to_string(),
            credential: Credential::Password {
                password: "not-a-real-password".to_string(),
            },
        },
    )
}

pub fn sandboxed_target(id: &str, root: &Path) -> Target {
    Target::sandboxed(
        id,
        SandboxHost {
            root: root.to_path_buf(),
            limits: ResourceLimits {
                cpu_cores: Some(1),
                memory_gb: Some(1.0),
                disk_gb: Some(5.0),
            },
        },
    )
}

pub fn engine_with(transport: Arc<dyn Transport>) -> Arc<ShellSessionEngine> {
    Arc::new(ShellSessionEngine::new(
        transport,
        Arc::new(SessionStore::default()),
    ))
}

/// Engine over a real `/bin/sh` confined to jail roots.
pub fn local_engine() -> Arc<ShellSessionEngine> {
    engine_with(Arc::new(JailedLocalTransport::default()))
}

pub fn console_with(engine: Arc<ShellSessionEngine>, redactor: Redactor) -> ConsoleApi {
    let packages = Arc::new(PackageEnvironmentManager::new(
        engine.clone(),
        crate::config::default_presets(),
    ));
    ConsoleApi::new(engine, packages, redactor)
}
