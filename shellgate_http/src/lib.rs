//! # Shellgate HTTP
//!
//! JSON-over-HTTP surface for the shellgate console. Every operation lives
//! under `/api/targets/{target_id}/...` and requires an
//! `Authorization: Bearer <token>` header; the token is resolved to a user and
//! the target must belong to that user.
//!
//! ## Example
//!
//! ```rust,no_run
//! use shellgate_core::config::ShellgateConfig;
//! use shellgate_http::{AppState, ServerConfig, start_server};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ShellgateConfig::load("shellgate.toml".as_ref())?;
//!     let (state, _sessions) = AppState::from_config(&config)?;
//!     let server = ServerConfig {
//!         bind_addr: config.server.bind_addr.parse()?,
//!         max_upload_bytes: config.server.max_upload_bytes,
//!     };
//!     start_server(server, Arc::new(state), async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod extract;
pub mod routes;
pub mod server;

pub use error::{HttpError, Result};
pub use server::{AppState, ServerConfig, build_cors_layer, build_router, start_server};
