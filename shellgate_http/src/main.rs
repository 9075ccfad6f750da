use anyhow::Context;
use clap::Parser;
use shellgate_core::SessionStore;
use shellgate_core::config::ShellgateConfig;
use shellgate_core::logging::init_logging;
use shellgate_http::{AppState, ServerConfig, start_server};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Browser console backend: remote shell sessions over SSH and sandboxed
/// servers.
#[derive(Parser, Debug)]
#[command(name = "shellgate")]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "shellgate.toml")]
    config: PathBuf,

    /// Overrides `server.bind_addr` from the configuration.
    #[arg(long)]
    bind_addr: Option<SocketAddr>,

    /// Default log level when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to stderr instead of the rolling log file.
    #[arg(long)]
    log_to_stderr: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, !args.log_to_stderr)?;

    let config = ShellgateConfig::load(&args.config)?;
    let bind_addr = match args.bind_addr {
        Some(addr) => addr,
        None => config
            .server
            .bind_addr
            .parse()
            .with_context(|| format!("Invalid server.bind_addr '{}'", config.server.bind_addr))?,
    };

    let (state, sessions) = AppState::from_config(&config)?;
    let shutdown = CancellationToken::new();
    let sweeper = SessionStore::start_sweeper(sessions, shutdown.clone());

    info!(
        config = %args.config.display(),
        targets = config.targets.len(),
        "Starting shellgate"
    );

    let server = ServerConfig {
        bind_addr,
        max_upload_bytes: config.server.max_upload_bytes,
    };
    let stop = shutdown.clone();
    let result = start_server(server, Arc::new(state), async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
            _ = stop.cancelled() => {}
        }
    })
    .await;

    shutdown.cancel();
    let _ = sweeper.await;
    result?;
    Ok(())
}
