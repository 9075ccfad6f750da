use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use shellgate_core::PathExpr;
use shellgate_core::config::ShellgateConfig;
use shellgate_core::error::TransportError;
use shellgate_core::executor::CommandResult;
use shellgate_core::redact::Redactor;
use shellgate_core::test_utils::{FakeTransport, console_with, engine_with};
use shellgate_http::{AppState, ServerConfig, build_router};
use std::sync::Arc;
use tower::ServiceExt;

const REGISTRY: &str = r#"
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
credential = { type = "password", password = "pw" }
"#;

fn app_with(transport: Arc<FakeTransport>) -> Router {
    let config = ShellgateConfig::from_toml(REGISTRY).unwrap();
    let api = console_with(engine_with(transport), Redactor::default());
    let state = AppState::new(api, Arc::new(config.registry().unwrap()));
    build_router(Arc::new(state), &ServerConfig::default())
}

fn authed(method: &str, uri: &str, token: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
}

fn json_post(uri: &str, body: Value) -> Request<Body> {
    authed("POST", uri, "alice-token")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_needs_no_token() {
    let app = app_with(Arc::new(FakeTransport::succeeding("")));
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn missing_or_unknown_token_is_unauthorized() {
    let transport = Arc::new(FakeTransport::succeeding(""));
    let app = app_with(transport.clone());

    let anonymous = Request::builder()
        .uri("/api/targets/web-1/history")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(anonymous).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let forged = authed("GET", "/api/targets/web-1/history", "nope")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(forged).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(transport.commands().is_empty());
}

#[tokio::test]
async fn foreign_and_unknown_targets_look_the_same() {
    let app = app_with(Arc::new(FakeTransport::succeeding("")));

    let foreign = authed("GET", "/api/targets/web-1/history", "bob-token")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(foreign).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let unknown = authed("GET", "/api/targets/ghost/history", "alice-token")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(unknown).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn exec_runs_in_the_session_directory() {
    let transport = Arc::new(FakeTransport::succeeding("hello\n"));
    let app = app_with(transport.clone());

    let response = app
        .oneshot(json_post(
            "/api/targets/web-1/exec",
            json!({ "command": "echo hello" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["exit_code"], 0);
    assert_eq!(body["stdout"], "hello\n");
    assert_eq!(body["current_directory"], "~");
    assert!(body.get("error_kind").is_none());
    assert_eq!(transport.commands(), vec!["cd ~ && echo hello"]);
}

#[tokio::test]
async fn blocked_commands_never_reach_the_transport() {
    let transport = Arc::new(FakeTransport::succeeding(""));
    let app = app_with(transport.clone());

    let response = app
        .oneshot(json_post(
            "/api/targets/web-1/exec",
            json!({ "command": "source venv/bin/activate && deactivate" }),
        ))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error_kind"], "command_blocked");
    assert!(transport.commands().is_empty());
}

#[tokio::test]
async fn transport_failures_are_reported_in_band() {
    let transport = Arc::new(FakeTransport::failing(|| {
        TransportError::ConnectionFailed("ssh: connect to host 203.0.113.10 port 22: Connection refused".into())
    }));
    let app = app_with(transport);

    let response = app
        .oneshot(json_post("/api/targets/web-1/exec", json!({ "command": "ls" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error_kind"], "transport");
    let stderr = body["stderr"].as_str().unwrap();
    assert!(!stderr.contains("203.0.113.10"), "address leaked: {stderr}");
}

#[tokio::test]
async fn upload_stores_body_under_the_given_name() {
    let transport = Arc::new(FakeTransport::succeeding(""));
    let app = app_with(transport.clone());

    let request = authed(
        "POST",
        "/api/targets/web-1/upload?remote_path=~/app&file_name=main.py",
        "alice-token",
    )
    .header(header::CONTENT_TYPE, "application/octet-stream")
    .body(Body::from("print('hi')\n"))
    .unwrap();
    let response = app.oneshot(request).await.unwrap();

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["path"], "~/app/main.py");
    assert_eq!(
        transport.uploads(),
        vec![(
            PathExpr::HomeRelative("app/main.py".into()),
            b"print('hi')\n".to_vec()
        )]
    );
}

#[tokio::test]
async fn stats_are_nullable_when_the_sample_prints_nothing_useful() {
    let transport = Arc::new(FakeTransport::new(|_| {
        Ok(CommandResult::new(0, "garbage\n", ""))
    }));
    let app = app_with(transport);

    let request = authed("GET", "/api/targets/web-1/detailed_stats", "alice-token")
        .body(Body::empty())
        .unwrap();
    let body = body_json(app.oneshot(request).await.unwrap()).await;

    assert_eq!(body["success"], true);
    assert!(body["cpu_percent"].is_null());
    assert!(body["memory_percent"].is_null());
    assert!(body["disk_percent"].is_null());
}

#[tokio::test]
async fn history_and_session_reflect_previous_commands() {
    let transport = Arc::new(FakeTransport::succeeding(""));
    let app = app_with(transport);

    for command in ["ls", "pwd", "ls"] {
        let response = app
            .clone()
            .oneshot(json_post("/api/targets/web-1/exec", json!({ "command": command })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let request = authed("GET", "/api/targets/web-1/history", "alice-token")
        .body(Body::empty())
        .unwrap();
    let body = body_json(app.clone().oneshot(request).await.unwrap()).await;
    assert_eq!(body["history"], json!(["pwd", "ls"]));

    let request = authed("DELETE", "/api/targets/web-1/session", "alice-token")
        .body(Body::empty())
        .unwrap();
    let body = body_json(app.clone().oneshot(request).await.unwrap()).await;
    assert_eq!(body["closed"], true);

    let request = authed("GET", "/api/targets/web-1/session", "alice-token")
        .body(Body::empty())
        .unwrap();
    let body = body_json(app.oneshot(request).await.unwrap()).await;
    assert_eq!(body["history_len"], 0);
    assert_eq!(body["current_directory"], "~");
}

#[tokio::test]
async fn presets_are_listed() {
    let app = app_with(Arc::new(FakeTransport::succeeding("")));
    let request = authed("GET", "/api/targets/web-1/packages/presets", "alice-token")
        .body(Body::empty())
        .unwrap();
    let body = body_json(app.oneshot(request).await.unwrap()).await;
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["web", "data", "telegram-bot"]);
}

#[tokio::test]
async fn malformed_json_gets_a_json_bad_request() {
    let transport = Arc::new(FakeTransport::succeeding(""));
    let app = app_with(transport.clone());

    let request = authed("POST", "/api/targets/web-1/exec", "alice-token")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"command\": "))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().starts_with("Bad request"));

    let response = app
        .oneshot(json_post("/api/targets/web-1/exec", json!({ "cmd": "ls" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["success"], false);
    assert!(transport.commands().is_empty());
}

#[tokio::test]
async fn missing_query_parameter_gets_a_json_bad_request() {
    let app = app_with(Arc::new(FakeTransport::succeeding("")));
    let request = authed("GET", "/api/targets/web-1/read_file", "alice-token")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("file_path"));
}

#[tokio::test]
async fn connection_check_reports_reachability() {
    let transport = Arc::new(FakeTransport::succeeding(""));
    let app = app_with(transport.clone());
    let request = authed("GET", "/api/targets/web-1/check_connection", "alice-token")
        .body(Body::empty())
        .unwrap();
    let body = body_json(app.oneshot(request).await.unwrap()).await;

    assert_eq!(body["success"], true);
    assert!(body["latency_ms"].is_u64());
    assert_eq!(transport.commands(), vec!["true"]);

    let unreachable = app_with(Arc::new(FakeTransport::failing(|| {
        TransportError::AuthenticationFailed("deploy@203.0.113.10: Permission denied".into())
    })));
    let request = authed("GET", "/api/targets/web-1/check_connection", "alice-token")
        .body(Body::empty())
        .unwrap();
    let body = body_json(unreachable.oneshot(request).await.unwrap()).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error_kind"], "transport");
    assert!(body["latency_ms"].is_null());
    assert!(!body["message"].as_str().unwrap().contains("203.0.113.10"));
}
