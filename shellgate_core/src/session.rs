//! # Session Store
//!
//! One [`SessionState`] per target id, created lazily on first use and shared
//! by every browser tab that drives that target. The state is bookkeeping only:
//! the remote side keeps no shell alive between calls, so the current
//! directory, command history and background-process registry all live here.
//!
//! ## Concurrency
//!
//! Sessions sit in a sharded [`DashMap`], so operations on different targets
//! never contend. Each session carries its own async mutex, and
//! [`SessionStore::begin`] holds it for the whole resolve → execute → update
//! sequence of one operation. Operations on the same session therefore run one
//! at a time, in the order they asked for the lock.
//!
//! ## Expiry
//!
//! A sweeper task started with [`SessionStore::start_sweeper`] wakes every
//! `sweep_interval` and drops sessions idle for longer than `idle_timeout`.
//! A session with an operation in flight is never dropped. Dropping a session
//! does not touch the remote machine: background processes it launched keep
//! running and are only logged as orphaned.

use crate::path_resolver::PathExpr;
use crate::target::TargetId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStoreConfig {
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub history_limit: usize,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Most-recent-last list of unique commands.
///
/// Re-issuing the command that is already last is a no-op; re-issuing an older
/// one moves it to the end. Beyond `limit` entries the oldest is dropped.
#[derive(Debug, Clone)]
pub struct CommandHistory {
    entries: VecDeque<String>,
    limit: usize,
}

impl CommandHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Returns `false` when nothing changed.
    pub fn push(&mut self, command: &str) -> bool {
        let command = command.trim();
        if command.is_empty() || self.entries.back().is_some_and(|last| last == command) {
            return false;
        }
        if let Some(pos) = self.entries.iter().position(|e| e == command) {
            self.entries.remove(pos);
        }
        self.entries.push_back(command.to_string());
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
        true
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A process started with `nohup` and tracked by label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackgroundProcess {
    pub label: String,
    pub pid: u32,
    pub log_path: PathExpr,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub current_directory: PathExpr,
    /// Target of `cd -`.
    pub previous_directory: Option<PathExpr>,
    pub history: CommandHistory,
    pub processes: BTreeMap<String, BackgroundProcess>,
    /// Cached Python environment root.
    pub environment: Option<PathExpr>,
}

impl SessionState {
    fn new(history_limit: usize) -> Self {
        Self {
            current_directory: PathExpr::Home,
            previous_directory: None,
            history: CommandHistory::new(history_limit),
            processes: BTreeMap::new(),
            environment: None,
        }
    }

    /// Moves to `next`, remembering where we came from.
    pub fn change_directory(&mut self, next: PathExpr) {
        if next != self.current_directory {
            let previous = std::mem::replace(&mut self.current_directory, next);
            self.previous_directory = Some(previous);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionPhase {
    Idle = 0,
    Executing = 1,
}

impl SessionPhase {
    /// Invalid values fall back to Idle.
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Executing,
            _ => Self::Idle,
        }
    }
}

pub struct SessionHandle {
    target_id: TargetId,
    phase: AtomicU8,
    epoch: Instant,
    /// Milliseconds after `epoch` of the last begin or end of an operation.
    last_activity_ms: AtomicU64,
    created_at: DateTime<Utc>,
    state: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
    fn new(target_id: TargetId, history_limit: usize) -> Self {
        Self {
            target_id,
            phase: AtomicU8::new(SessionPhase::Idle as u8),
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            created_at: Utc::now(),
            state: Arc::new(Mutex::new(SessionState::new(history_limit))),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn touch(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_activity_ms.store(now, Ordering::SeqCst);
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::SeqCst));
        self.epoch.elapsed().saturating_sub(last)
    }
}

/// Exclusive access to one session for the duration of an operation.
pub struct ActiveSession {
    handle: Arc<SessionHandle>,
    guard: OwnedMutexGuard<SessionState>,
}

impl ActiveSession {
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            target_id: self.handle.target_id.clone(),
            current_directory: self.guard.current_directory.clone(),
            previous_directory: self.guard.previous_directory.clone(),
            history_len: self.guard.history.len(),
            processes: self.guard.processes.values().cloned().collect(),
            environment: self.guard.environment.clone(),
            created_at: self.handle.created_at,
        }
    }
}

impl Deref for ActiveSession {
    type Target = SessionState;

    fn deref(&self) -> &SessionState {
        &self.guard
    }
}

impl DerefMut for ActiveSession {
    fn deref_mut(&mut self) -> &mut SessionState {
        &mut self.guard
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.handle.touch();
        self.handle
            .phase
            .store(SessionPhase::Idle as u8, Ordering::SeqCst);
    }
}

/// Read-only view of a session for introspection endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub target_id: TargetId,
    pub current_directory: PathExpr,
    pub previous_directory: Option<PathExpr>,
    pub history_len: usize,
    pub processes: Vec<BackgroundProcess>,
    pub environment: Option<PathExpr>,
    pub created_at: DateTime<Utc>,
}

pub struct SessionStore {
    sessions: DashMap<TargetId, Arc<SessionHandle>>,
    config: SessionStoreConfig,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionStoreConfig::default())
    }
}

impl SessionStore {
    pub fn new(config: SessionStoreConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &SessionStoreConfig {
        &self.config
    }

    fn get_or_create(&self, target_id: &str) -> Arc<SessionHandle> {
        if let Some(existing) = self.sessions.get(target_id) {
            return existing.clone();
        }
        self.sessions
            .entry(target_id.to_string())
            .or_insert_with(|| {
                debug!(target_id, "Creating session");
                Arc::new(SessionHandle::new(
                    target_id.to_string(),
                    self.config.history_limit,
                ))
            })
            .clone()
    }

    /// Waits for exclusive access to the target's session, creating it if
    /// needed.
    pub async fn begin(&self, target_id: &str) -> ActiveSession {
        let handle = self.get_or_create(target_id);
        let guard = handle.state.clone().lock_owned().await;
        handle
            .phase
            .store(SessionPhase::Executing as u8, Ordering::SeqCst);
        handle.touch();
        ActiveSession { handle, guard }
    }

    pub fn contains(&self, target_id: &str) -> bool {
        self.sessions.contains_key(target_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn phase(&self, target_id: &str) -> Option<SessionPhase> {
        self.sessions.get(target_id).map(|h| h.phase())
    }

    /// Forgets a session immediately. Returns whether one existed.
    pub fn remove(&self, target_id: &str) -> bool {
        let removed = self.sessions.remove(target_id).is_some();
        if removed {
            info!(target_id, "Session closed");
        }
        removed
    }

    /// Drops idle sessions; returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let ttl = self.config.idle_timeout;
        let mut evicted = 0;

        self.sessions.retain(|target_id, handle| {
            if handle.phase() == SessionPhase::Executing || handle.idle_for() < ttl {
                return true;
            }
            // The lock can still be held for a moment around phase changes.
            let Ok(state) = handle.state.try_lock() else {
                return true;
            };
            if state.processes.is_empty() {
                debug!(target_id, "Evicting idle session");
            } else {
                warn!(
                    target_id,
                    orphaned = ?state.processes.values().map(|p| p.pid).collect::<Vec<_>>(),
                    "Evicting idle session; its background processes keep running untracked"
                );
            }
            evicted += 1;
            false
        });
        evicted
    }

    /// Spawns the periodic sweeper. It stops when `shutdown` is cancelled or
    /// the store is dropped.
    pub fn start_sweeper(store: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let interval = store.config.sweep_interval;
        let weak_store = Arc::downgrade(&store);
        drop(store);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Session sweeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }

                let Some(store) = weak_store.upgrade() else {
                    debug!("SessionStore dropped, stopping sweeper");
                    break;
                };
                let evicted = store.sweep();
                if evicted > 0 {
                    info!(evicted, remaining = store.len(), "Swept idle sessions");
                }
            }
        })
    }
}
