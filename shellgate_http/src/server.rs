//! Server wiring: application state, router, CORS and the serve loop.

use crate::error::{HttpError, Result};
use crate::routes;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderMap, HeaderValue, Method, header},
    routing::{get, post},
};
use shellgate_core::config::ShellgateConfig;
use shellgate_core::executor::{JailedLocalTransport, OpenSshTransport, TargetRouter};
use shellgate_core::packages::PackageEnvironmentManager;
use shellgate_core::sanitizer::CommandSanitizer;
use shellgate_core::{
    AccessDecision, ConsoleApi, SessionStore, ShellSessionEngine, Target, TargetRegistry,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

pub const TARGET_PREFIX: &str = "/api/targets/{target_id}";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Use port 0 to bind a random free port.
    pub bind_addr: SocketAddr,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

pub struct AppState {
    pub api: ConsoleApi,
    pub registry: Arc<dyn TargetRegistry>,
}

impl AppState {
    pub fn new(api: ConsoleApi, registry: Arc<dyn TargetRegistry>) -> Self {
        Self { api, registry }
    }

    /// Builds the full stack described by a configuration file. The session
    /// store is returned separately so the caller can run its sweeper.
    pub fn from_config(config: &ShellgateConfig) -> anyhow::Result<(Self, Arc<SessionStore>)> {
        let transport = Arc::new(TargetRouter::new(
            Arc::new(OpenSshTransport::new(config.ssh.clone())),
            Arc::new(JailedLocalTransport::new(config.sandbox.shell.clone())),
        ));
        let sessions = Arc::new(SessionStore::new(config.sessions.to_store()));
        let engine = Arc::new(
            ShellSessionEngine::new(transport, sessions.clone())
                .with_timeouts(config.timeouts.to_engine())
                .with_sanitizer(
                    CommandSanitizer::default()
                        .with_extra_phrases(config.commands.blocked_phrases.iter().cloned()),
                )
                .with_discovery(config.packages.discovery.clone()),
        );
        let packages = Arc::new(PackageEnvironmentManager::new(
            engine.clone(),
            config.packages.presets.clone(),
        ));
        let api = ConsoleApi::new(engine, packages, config.redactor());
        let registry = Arc::new(config.registry()?);
        Ok((Self::new(api, registry), sessions))
    }

    /// Resolves the bearer token and checks that the caller owns the target.
    pub async fn authorize(&self, headers: &HeaderMap, target_id: &str) -> Result<Target> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(HttpError::Unauthorized)?;

        let identity = self
            .registry
            .authenticate(token)
            .await
            .ok_or(HttpError::Unauthorized)?;

        match self.registry.authorize(&identity, target_id).await {
            AccessDecision::Granted(target) => Ok(*target),
            AccessDecision::Denied => {
                debug!(user = %identity.user, target_id, "Target access denied");
                Err(HttpError::TargetNotFound)
            }
        }
    }
}

/// Loopback binds only accept browser origins on loopback; anything else
/// accepts any origin and relies on the bearer token.
pub fn build_cors_layer(bind_addr: &SocketAddr) -> CorsLayer {
    let methods = AllowMethods::list([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS]);
    let headers = AllowHeaders::list([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    let origin = if bind_addr.ip().is_loopback() {
        AllowOrigin::predicate(|origin: &HeaderValue, _req: &axum::http::request::Parts| {
            let Ok(origin) = origin.to_str() else {
                return false;
            };
            let lower = origin.to_ascii_lowercase();
            lower.starts_with("http://127.0.0.1")
                || lower.starts_with("http://localhost")
                || lower.starts_with("http://[::1]")
        })
    } else {
        AllowOrigin::any()
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(methods)
        .allow_headers(headers)
}

fn target_route(suffix: &str) -> String {
    format!("{TARGET_PREFIX}{suffix}")
}

pub fn build_router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route(&target_route("/exec"), post(routes::exec))
        .route(&target_route("/cd"), post(routes::cd))
        .route(&target_route("/ls"), get(routes::ls))
        .route(&target_route("/read_file"), get(routes::read_file))
        .route(&target_route("/write_file"), post(routes::write_file))
        .route(&target_route("/create_file"), post(routes::create_file))
        .route(&target_route("/create_directory"), post(routes::create_directory))
        .route(&target_route("/rename"), post(routes::rename))
        .route(&target_route("/delete"), post(routes::delete))
        .route(
            &target_route("/upload"),
            post(routes::upload).layer(DefaultBodyLimit::max(config.max_upload_bytes)),
        )
        .route(&target_route("/search"), get(routes::search))
        .route(&target_route("/detailed_stats"), get(routes::detailed_stats))
        .route(&target_route("/check_connection"), get(routes::check_connection))
        .route(&target_route("/run"), post(routes::run))
        .route(&target_route("/stop"), post(routes::stop))
        .route(&target_route("/processes"), get(routes::processes))
        .route(&target_route("/history"), get(routes::history))
        .route(
            &target_route("/session"),
            get(routes::session_info).delete(routes::close_session),
        )
        .route(&target_route("/packages"), get(routes::installed_packages))
        .route(&target_route("/packages/install"), post(routes::install))
        .route(
            &target_route("/packages/install_manifest"),
            post(routes::install_manifest),
        )
        .route(
            &target_route("/packages/install_preset"),
            post(routes::install_preset),
        )
        .route(&target_route("/packages/uninstall"), post(routes::uninstall))
        .route(&target_route("/packages/presets"), get(routes::presets))
        .layer(build_cors_layer(&config.bind_addr))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until `shutdown` resolves.
pub async fn start_server<F>(config: ServerConfig, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if !config.bind_addr.ip().is_loopback() {
        warn!(
            "Bound to non-loopback address {}. CORS allows any origin; protect the port with TLS termination or a firewall.",
            config.bind_addr
        );
    }

    let app = build_router(state, &config);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .map_err(|e| HttpError::Server(format!("Failed to bind: {e}")))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| HttpError::Server(format!("Failed to get local addr: {e}")))?;

    info!("Shellgate listening on http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| HttpError::Server(format!("Server error: {e}")))?;

    info!("Shellgate stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_routes_share_the_prefix() {
        assert_eq!(target_route("/exec"), "/api/targets/{target_id}/exec");
    }

    #[test]
    fn loopback_cors_is_restrictive() {
        let cors = build_cors_layer(&"127.0.0.1:8080".parse().unwrap());
        assert!(!format!("{cors:?}").contains("\"*\""));
    }

    #[test]
    fn public_cors_allows_any_origin() {
        let cors = build_cors_layer(&"0.0.0.0:8080".parse().unwrap());
        assert!(format!("{cors:?}").contains("\"*\""));
    }
}
