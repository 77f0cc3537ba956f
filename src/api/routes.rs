//! API route definitions

use axum::routing::{any, get};
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", any(handlers::control::root))
        .route("/Refresh", any(handlers::control::refresh))
        .route("/ReStart", any(handlers::control::restart))
        .route("/AddOutbound", any(handlers::control::add_outbound))
        .route("/RemoveOutbound", any(handlers::control::remove_outbound))
        .route("/health", get(handlers::health::health_check))
        .route("/status", get(handlers::health::status))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::Supervisor;
    use crate::probe::latency::tests::table;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::path::Path;
    use tempfile::tempdir;
    use tower::ServiceExt;

    /// Router over a supervisor whose files all live in `dir`
    fn app(dir: &Path) -> Router {
        let config_path = dir.join("helper.yaml");
        let yaml = format!(
            "xrayConfig:\n  xrayExeDir: {0}/bin\n  xrayConfigDir: {0}/conf\n  logDir: {0}/logs\n",
            dir.display()
        );
        std::fs::write(&config_path, yaml).unwrap();

        let config = Config::load(&config_path).unwrap().xray_config;
        let supervisor = Supervisor::with_probe(config, config_path, table(&[]));
        create_router(AppState::new(supervisor))
    }

    async fn call(method: Method, uri: &str) -> (StatusCode, String) {
        let dir = tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_plain_text_routes() {
        for (uri, expected) in [
            ("/", "xray helper"),
            ("/AddOutbound", "AddOutbound not support"),
            ("/RemoveOutbound", "RemoveOutbound not support"),
        ] {
            let (status, body) = call(Method::GET, uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, expected);
        }

        let (status, body) = call(Method::POST, "/AddOutbound").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "AddOutbound not support");
    }

    #[tokio::test]
    async fn test_refresh_and_restart_reply_immediately() {
        let (status, body) = call(Method::GET, "/Refresh").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "xray refresh");

        let (status, body) = call(Method::GET, "/ReStart").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "xray ReStart");
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let (status, body) = call(Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let health: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(health["status"], "healthy");

        let (status, body) = call(Method::GET, "/status").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["state"], "stopped");
        assert_eq!(value["endpoints"], 0);
        assert_eq!(value["selected"], serde_json::json!([]));
        assert!(value["engine_pid"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (status, _) = call(Method::GET, "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
