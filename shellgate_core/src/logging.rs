//! # Logging Initialization
//!
//! One global `tracing` subscriber per process, installed by [`init_logging`].
//!
//! - `RUST_LOG` overrides the filter; otherwise `<level>` applies everywhere
//!   and both shellgate crates log at `debug`.
//! - With `log_to_file`, output goes to a daily rolling file in the user cache
//!   directory (from `directories`), without ANSI colours.
//! - Otherwise, or when the cache directory is unusable, output goes to stderr
//!   with colours.
//!
//! Commands are logged at debug level. Credentials never reach a log line:
//! [`Credential`](crate::target::Credential) has a redacting `Debug`.

use anyhow::Result;
use directories::ProjectDirs;
use std::{io::stderr, path::Path, sync::Once};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

/// `trace`-level stderr logging for tests.
pub fn init_test_logging() {
    let _ = init_logging("trace", false);
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{log_level},shellgate_core=debug,shellgate_http=debug"
            ))
        });

        if log_to_file && let Some(proj_dirs) = ProjectDirs::from("dev", "Shellgate", "shellgate") {
            let log_dir = proj_dirs.cache_dir();

            // tracing_appender::rolling::daily panics on an unwritable directory.
            let file_appender = if can_write(log_dir) {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    tracing_appender::rolling::daily(log_dir, "shellgate.log")
                }))
                .ok()
            } else {
                None
            };

            if let Some(file_appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(non_blocking).with_ansi(false))
                    .init();
                // Flushes on exit only while alive.
                Box::leak(Box::new(guard));
                return;
            }
        }

        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer().with_writer(stderr).with_ansi(true))
            .init();
    });

    Ok(())
}

fn can_write(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let marker = dir.join(".shellgate_log_check");
    match std::fs::write(&marker, "ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&marker);
            true
        }
        Err(_) => false,
    }
}
