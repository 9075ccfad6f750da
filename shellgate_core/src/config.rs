//! # Configuration
//!
//! `shellgate.toml` describes the server, the engine tunables and the static
//! user/target registry. Every field has a default, so an empty file is a
//! valid (if useless) configuration.
//!
//! ```toml
//! [server]
//! bind_addr = "127.0.0.1:8080"
//!
//! [sandbox]
//! base_dir = "/srv/shellgate/sandboxes"
//!
//! [[users]]
//! name = "alice"
//! token = "change-me"
//!
//! [[targets]]
//! id = "web-1"
//! owner = "alice"
//! kind = "open"
//! host = "203.0.113.10"
//! username = "deploy"
//! credential = { type = "key_file", path = "/home/alice/.ssh/id_ed25519" }
//!
//! [[targets]]
//! id = "box-1"
//! owner = "alice"
//! kind = "sandboxed"
//! limits = { cpu_cores = 1, memory_gb = 1.0, disk_gb = 5.0 }
//! ```

use crate::engine::EngineTimeouts;
use crate::executor::SshOptions;
use crate::packages::{DiscoveryConfig, PackagePreset};
use crate::redact::Redactor;
use crate::session::{DEFAULT_HISTORY_LIMIT, SessionStoreConfig};
use crate::target::{
    AccessDecision, Credential, Identity, ResourceLimits, SandboxHost, SshEndpoint, Target,
    TargetRegistry,
};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_addr: String,
    /// Upper bound for `/upload` request bodies.
    pub max_upload_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

/// All values in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSection {
    pub exec_secs: u64,
    pub max_exec_secs: u64,
    pub install_secs: u64,
    pub stats_secs: u64,
    pub search_secs: u64,
    pub file_ops_secs: u64,
    pub environment_secs: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        let defaults = EngineTimeouts::default();
        Self {
            exec_secs: defaults.exec.as_secs(),
            max_exec_secs: defaults.max_exec.as_secs(),
            install_secs: defaults.install.as_secs(),
            stats_secs: defaults.stats.as_secs(),
            search_secs: defaults.search.as_secs(),
            file_ops_secs: defaults.file_ops.as_secs(),
            environment_secs: defaults.environment.as_secs(),
        }
    }
}

impl TimeoutSection {
    pub fn to_engine(&self) -> EngineTimeouts {
        EngineTimeouts {
            exec: Duration::from_secs(self.exec_secs),
            max_exec: Duration::from_secs(self.max_exec_secs),
            install: Duration::from_secs(self.install_secs),
            stats: Duration::from_secs(self.stats_secs),
            search: Duration::from_secs(self.search_secs),
            file_ops: Duration::from_secs(self.file_ops_secs),
            environment: Duration::from_secs(self.environment_secs),
        }
    }

    fn all(&self) -> [(&'static str, u64); 7] {
        [
            ("exec_secs", self.exec_secs),
            ("max_exec_secs", self.max_exec_secs),
            ("install_secs", self.install_secs),
            ("stats_secs", self.stats_secs),
            ("search_secs", self.search_secs),
            ("file_ops_secs", self.file_ops_secs),
            ("environment_secs", self.environment_secs),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub history_limit: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60 * 60,
            sweep_interval_secs: 5 * 60,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl SessionSection {
    pub fn to_store(&self) -> SessionStoreConfig {
        SessionStoreConfig {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            history_limit: self.history_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageSection {
    pub discovery: DiscoveryConfig,
    pub presets: Vec<PackagePreset>,
}

impl Default for PackageSection {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            presets: default_presets(),
        }
    }
}

fn preset(id: &str, name: &str, packages: &[&str]) -> PackagePreset {
    PackagePreset {
        id: id.to_string(),
        name: name.to_string(),
        packages: packages.iter().map(|p| p.to_string()).collect(),
    }
}

pub fn default_presets() -> Vec<PackagePreset> {
    vec![
        preset("web", "Web application", &["flask", "gunicorn", "requests"]),
        preset("data", "Data analysis", &["numpy", "pandas", "matplotlib"]),
        preset("telegram-bot", "Telegram bot", &["aiogram", "python-dotenv"]),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionSection {
    pub enabled: bool,
    /// Literal strings replaced before the pattern rules run. Sandbox roots
    /// are added automatically.
    pub internal_fragments: Vec<String>,
}

impl Default for RedactionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            internal_fragments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSection {
    /// Added to the built-in denylist.
    pub blocked_phrases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    /// Default jail roots are `<base_dir>/user_<owner>/server_<id>`.
    pub base_dir: PathBuf,
    pub shell: String,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/srv/shellgate/sandboxes"),
            shell: "/bin/sh".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub name: String,
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetEntryKind {
    Open,
    Sandboxed,
}

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub id: String,
    pub owner: String,
    pub kind: TargetEntryKind,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<Credential>,
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub limits: ResourceLimits,
}

impl TargetEntry {
    pub fn to_target(&self, sandbox: &SandboxSection) -> Result<Target> {
        match self.kind {
            TargetEntryKind::Open => {
                let (Some(host), Some(username), Some(credential)) =
                    (&self.host, &self.username, &self.credential)
                else {
                    bail!(
                        "open target '{}' needs host, username and credential",
                        self.id
                    );
                };
                Ok(Target::open(
                    self.id.clone(),
                    SshEndpoint {
                        host: host.clone(),
                        port: self.port,
                        username: username.clone(),
                        credential: credential.clone(),
                    },
                ))
            }
            TargetEntryKind::Sandboxed => Ok(Target::sandboxed(
                self.id.clone(),
                SandboxHost {
                    root: self.sandbox_root(sandbox),
                    limits: self.limits.clone(),
                },
            )),
        }
    }

    pub fn sandbox_root(&self, sandbox: &SandboxSection) -> PathBuf {
        self.root.clone().unwrap_or_else(|| {
            sandbox
                .base_dir
                .join(format!("user_{}", self.owner))
                .join(format!("server_{}", self.id))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellgateConfig {
    pub server: ServerSection,
    pub timeouts: TimeoutSection,
    pub sessions: SessionSection,
    pub packages: PackageSection,
    pub redaction: RedactionSection,
    pub commands: CommandSection,
    pub ssh: SshOptions,
    pub sandbox: SandboxSection,
    pub users: Vec<UserEntry>,
    pub targets: Vec<TargetEntry>,
}

impl ShellgateConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!(
            path = %path.display(),
            users = config.users.len(),
            targets = config.targets.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in self.timeouts.all() {
            if value == 0 {
                bail!("timeouts.{name} must be greater than zero");
            }
        }
        if self.sessions.history_limit == 0 {
            bail!("sessions.history_limit must be greater than zero");
        }
        if self.sessions.idle_timeout_secs == 0 || self.sessions.sweep_interval_secs == 0 {
            bail!("sessions.idle_timeout_secs and sessions.sweep_interval_secs must be greater than zero");
        }

        let mut users = HashSet::new();
        let mut tokens = HashSet::new();
        for user in &self.users {
            if user.token.trim().is_empty() {
                bail!("user '{}' has an empty token", user.name);
            }
            if !users.insert(user.name.as_str()) {
                bail!("duplicate user '{}'", user.name);
            }
            if !tokens.insert(user.token.as_str()) {
                bail!("user '{}' reuses another user's token", user.name);
            }
        }

        let mut ids = HashSet::new();
        for entry in &self.targets {
            if entry.id.trim().is_empty() {
                bail!("target ids must not be empty");
            }
            if !ids.insert(entry.id.as_str()) {
                bail!("duplicate target id '{}'", entry.id);
            }
            if !users.contains(entry.owner.as_str()) {
                bail!("target '{}' is owned by unknown user '{}'", entry.id, entry.owner);
            }
            let limits = &entry.limits;
            if limits.cpu_cores == Some(0)
                || limits.memory_gb.is_some_and(|v| v <= 0.0)
                || limits.disk_gb.is_some_and(|v| v <= 0.0)
            {
                bail!("target '{}' has a resource limit that is not positive", entry.id);
            }
            entry.to_target(&self.sandbox)?;
        }

        let mut presets = HashSet::new();
        for preset in &self.packages.presets {
            if !presets.insert(preset.id.as_str()) {
                bail!("duplicate package preset '{}'", preset.id);
            }
        }
        Ok(())
    }

    /// Redactor covering the configured fragments plus every sandbox root.
    pub fn redactor(&self) -> Redactor {
        let mut fragments = self.redaction.internal_fragments.clone();
        fragments.push(self.sandbox.base_dir.display().to_string());
        for entry in &self.targets {
            if entry.kind == TargetEntryKind::Sandboxed {
                fragments.push(entry.sandbox_root(&self.sandbox).display().to_string());
            }
        }
        Redactor::new(self.redaction.enabled, fragments)
    }

    pub fn registry(&self) -> Result<StaticRegistry> {
        StaticRegistry::from_config(self)
    }
}

/// Registry backed by the `[[users]]` and `[[targets]]` tables.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    tokens: HashMap<String, String>,
    targets: HashMap<String, (String, Target)>,
}

impl StaticRegistry {
    pub fn from_config(config: &ShellgateConfig) -> Result<Self> {
        let tokens = config
            .users
            .iter()
            .map(|u| (u.token.clone(), u.name.clone()))
            .collect();
        let targets = config
            .targets
            .iter()
            .map(|entry| {
                let target = entry.to_target(&config.sandbox)?;
                Ok((entry.id.clone(), (entry.owner.clone(), target)))
            })
            .collect::<Result<_>>()?;
        Ok(Self { tokens, targets })
    }
}

#[async_trait]
impl TargetRegistry for StaticRegistry {
    async fn authenticate(&self, bearer_token: &str) -> Option<Identity> {
        self.tokens.get(bearer_token).map(|user| Identity {
            user: user.clone(),
        })
    }

    async fn authorize(&self, identity: &Identity, target_id: &str) -> AccessDecision {
        match self.targets.get(target_id) {
            Some((owner, target)) if *owner == identity.user => {
                AccessDecision::Granted(Box::new(target.clone()))
            }
            _ => AccessDecision::Denied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetKind;

    const SAMPLE: &str = r#"
[server]
bind_addr = "0.0.0.0:9000"

[timeouts]
exec_secs = 10

[sandbox]
base_dir = "/var/jails"

[redaction]
internal_fragments = ["/mnt/storage"]

[[users]]
name = "alice"
token = "alice-token"

[[users]]
name = "bob"
token = "bob-token"

[[targets]]
id = "web-1"
owner = "alice"
kind = "open"
host = "203.0.113.10"
username = "deploy"
credential = { type = "password", password = "s3cret" }

[[targets]]
id = "box-1"
owner = "bob"
kind = "sandboxed"
limits = { cpu_cores = 1, memory_gb = 1.0, disk_gb = 5.0 }
"#;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = ShellgateConfig::from_toml("").unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.timeouts.to_engine(), EngineTimeouts::default());
        assert_eq!(config.sessions.history_limit, 100);
        assert_eq!(config.packages.presets.len(), 3);
        assert!(config.redaction.enabled);
    }

    #[test]
    fn sample_parses_and_fills_gaps() {
        let config = ShellgateConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.timeouts.exec_secs, 10);
        assert_eq!(config.timeouts.install_secs, 300);

        let web = config.targets[0].to_target(&config.sandbox).unwrap();
        match web.kind {
            TargetKind::Open(endpoint) => {
                assert_eq!(endpoint.port, 22);
                assert_eq!(endpoint.username, "deploy");
            }
            other => panic!("expected open target, got {other:?}"),
        }

        let jail = config.targets[1].to_target(&config.sandbox).unwrap();
        match jail.kind {
            TargetKind::Sandboxed(host) => {
                assert_eq!(host.root, PathBuf::from("/var/jails/user_bob/server_box-1"));
                assert_eq!(host.limits.cpu_cores, Some(1));
            }
            other => panic!("expected sandboxed target, got {other:?}"),
        }
    }

    #[test]
    fn validation_rejects_inconsistent_registries() {
        let orphan = r#"
[[targets]]
id = "box-1"
owner = "nobody"
kind = "sandboxed"
"#;
        assert!(ShellgateConfig::from_toml(orphan).is_err());

        let incomplete = r#"
[[users]]
name = "alice"
token = "t"

[[targets]]
id = "web-1"
owner = "alice"
kind = "open"
host = "example.com"
"#;
        assert!(ShellgateConfig::from_toml(incomplete).is_err());

        let zero_timeout = "[timeouts]\nexec_secs = 0\n";
        assert!(ShellgateConfig::from_toml(zero_timeout).is_err());

        let duplicate_users = r#"
[[users]]
name = "alice"
token = "a"

[[users]]
name = "alice"
token = "b"
"#;
        assert!(ShellgateConfig::from_toml(duplicate_users).is_err());
    }

    #[test]
    fn redactor_hides_sandbox_roots() {
        let config = ShellgateConfig::from_toml(SAMPLE).unwrap();
        let redactor = config.redactor();
        let text = redactor.redact("cannot open /var/jails/user_bob/server_box-1/app.py");
        assert!(!text.contains("/var/jails"));
        assert!(!text.contains("user_bob"));
    }

    #[tokio::test]
    async fn registry_enforces_ownership() {
        let config = ShellgateConfig::from_toml(SAMPLE).unwrap();
        let registry = config.registry().unwrap();

        assert!(registry.authenticate("wrong").await.is_none());
        let alice = registry.authenticate("alice-token").await.unwrap();
        assert_eq!(alice.user, "alice");

        assert!(matches!(
            registry.authorize(&alice, "web-1").await,
            AccessDecision::Granted(_)
        ));
        assert_eq!(registry.authorize(&alice, "box-1").await, AccessDecision::Denied);
        assert_eq!(registry.authorize(&alice, "missing").await, AccessDecision::Denied);
    }
}
