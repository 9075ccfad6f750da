//! # Shellgate Core
//!
//! A stateful pseudo-shell over stateless remote execution. A browser console
//! sends `(target_id, operation)` pairs; this crate runs each one against the
//! target's machine as a single shell invocation and keeps the illusion of a
//! persistent shell on the server side: current directory, `cd -`, command
//! history, background processes and a cached Python environment.
//!
//! Two kinds of target are supported:
//!
//! - **Open** targets are the user's own machines, reached over SSH. Paths are
//!   unrestricted.
//! - **Sandboxed** targets are allocated servers: a jail directory on the
//!   hosting machine. Absolute paths and `..` escapes are clamped to the jail's
//!   home, and privileged commands are refused.
//!
//! ## Modules
//!
//! - **`path_resolver`**: symbolic paths (`~`, `~/rel`, `/abs`) and the jail clamp.
//! - **`shell_syntax`**: quoting and the minimal tokenizer the sanitizer uses.
//! - **`sanitizer`**: command denylist.
//! - **`executor`**: the `Transport` seam plus the SSH and jailed-local transports.
//! - **`session`**: per-target session state, locking and idle expiry.
//! - **`engine`**: the operations (exec, cd, file ops, search, background runs, stats).
//! - **`packages`**: Python environment discovery and package installation.
//! - **`api`**: redacted, never-failing responses for the web layer.
//! - **`config`**: `shellgate.toml` and the static target registry.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod listing;
pub mod logging;
pub mod packages;
pub mod path_resolver;
pub mod redact;
pub mod sanitizer;
pub mod session;
pub mod shell_syntax;
pub mod stats;
pub mod target;

// Test utilities
pub mod test_utils;

pub use api::ConsoleApi;
pub use engine::ShellSessionEngine;
pub use error::{EngineError, ErrorKind, JailViolation, TransportError};
pub use path_resolver::{PathExpr, PathPolicy};
pub use session::SessionStore;
pub use target::{AccessDecision, Identity, Target, TargetRegistry};
