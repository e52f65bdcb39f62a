use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use stagehand_core::coordinator::StatusHandle;
use tower::ServiceExt;

use stagehand_api::config::{LogFormat, ServerConfig};
use stagehand_api::router::build_app_router;
use stagehand_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 10,
        config_path: "stagehand.json".into(),
        log_format: LogFormat::Text,
    }
}

/// Build the health router with the production middleware stack, reading
/// the given coordinator status.
pub fn build_test_app(status: StatusHandle) -> Router {
    build_app_router(AppState { status }, &test_config())
}

pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
