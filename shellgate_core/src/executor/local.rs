use super::process::run_with_timeout;
use super::{CommandResult, Transport};
use crate::error::TransportError;
use crate::path_resolver::{PathExpr, validate_jailed_path};
use crate::target::{SandboxHost, Target, TargetKind};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Runs commands for allocated servers on the hosting machine, inside the
/// server's jail root.
///
/// The shell starts with a cleared environment: `HOME` and the working
/// directory are the jail root, caches point inside it, and nothing from the
/// host process environment leaks through except `PATH`.
#[derive(Debug, Clone)]
pub struct JailedLocalTransport {
    shell: String,
}

impl Default for JailedLocalTransport {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
        }
    }
}

impl JailedLocalTransport {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    fn host<'a>(&self, target: &'a Target) -> Result<&'a SandboxHost, TransportError> {
        match &target.kind {
            TargetKind::Sandboxed(host) => Ok(host),
            TargetKind::Open(_) => Err(TransportError::Unsupported(
                "open targets are reached over SSH".to_string(),
            )),
        }
    }

    async fn ensure_root(root: &Path) -> Result<(), TransportError> {
        if !tokio::fs::try_exists(root).await? {
            debug!(root = %root.display(), "Creating jail root");
            tokio::fs::create_dir_all(root).await?;
        }
        Ok(())
    }

    fn shell_command(&self, root: &Path, command: &str) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(root)
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string()))
            .env("HOME", root)
            .env("LANG", "C.UTF-8")
            .env("XDG_CACHE_HOME", root.join(".cache"))
            .env("PIP_CACHE_DIR", root.join(".cache").join("pip"))
            .env("TMPDIR", root.join(".tmp"));
        cmd
    }
}

#[async_trait]
impl Transport for JailedLocalTransport {
    async fn execute(
        &self,
        target: &Target,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, TransportError> {
        let host = self.host(target)?;
        Self::ensure_root(&host.root).await?;
        tokio::fs::create_dir_all(host.root.join(".tmp")).await?;

        run_with_timeout(self.shell_command(&host.root, command), None, timeout).await
    }

    async fn upload(
        &self,
        target: &Target,
        destination: &PathExpr,
        contents: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let host = self.host(target)?;
        Self::ensure_root(&host.root).await?;

        let local = validate_jailed_path(destination, &host.root)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        if destination.is_home() {
            return Err(TransportError::Io(
                "destination is the home directory, not a file".to_string(),
            ));
        }

        let write = async {
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&local, contents).await
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(result) => result.map_err(TransportError::from),
            Err(_) => Err(TransportError::Timeout {
                seconds: timeout.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::ResourceLimits;
    use anyhow::Result;
    use tempfile::TempDir;

    fn jailed(root: &Path) -> Target {
        Target::sandboxed(
            "alloc-1",
            SandboxHost {
                root: root.to_path_buf(),
                limits: ResourceLimits::default(),
            },
        )
    }

    #[tokio::test]
    async fn home_is_the_jail_root() -> Result<()> {
        let temp = TempDir::new()?;
        let target = jailed(temp.path());
        let transport = JailedLocalTransport::default();

        let result = transport
            .execute(&target, "cd ~ && pwd -P", Duration::from_secs(10))
            .await?;
        assert!(result.success);
        assert_eq!(result.stdout.trim(), std::fs::canonicalize(temp.path())?.to_string_lossy());
        Ok(())
    }

    #[tokio::test]
    async fn host_environment_does_not_leak() -> Result<()> {
        let temp = TempDir::new()?;
        let target = jailed(temp.path());
        let result = JailedLocalTransport::default()
            .execute(&target, "env | grep -c CARGO_ || true", Duration::from_secs(10))
            .await?;
        assert_eq!(result.stdout.trim(), "0");
        Ok(())
    }

    #[tokio::test]
    async fn upload_creates_parents_and_stays_in_root() -> Result<()> {
        let temp = TempDir::new()?;
        let target = jailed(temp.path());
        let transport = JailedLocalTransport::default();

        let destination = PathExpr::HomeRelative("a/b/c.txt".into());
        transport
            .upload(&target, &destination, b"hello", Duration::from_secs(10))
            .await?;
        assert_eq!(std::fs::read_to_string(temp.path().join("a/b/c.txt"))?, "hello");

        let outside = PathExpr::Absolute("/tmp/escape.txt".into());
        assert!(
            transport
                .upload(&target, &outside, b"x", Duration::from_secs(10))
                .await
                .is_err()
        );
        Ok(())
    }

    #[tokio::test]
    async fn refuses_open_targets() {
        use crate::target::{Credential, SshEndpoint};
        let target = Target::open(
            "vps",
            SshEndpoint {
                host: "example.invalid".into(),
                port: 22,
                username: "root".into(),
                credential: Credential::Password {
                    password: "pw".into(),
                },
            },
        );
        let result = JailedLocalTransport::default()
            .execute(&target, "true", Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(TransportError::Unsupported(_))));
    }
}
