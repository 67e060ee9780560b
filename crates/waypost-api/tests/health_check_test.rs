//! Integration tests for the health endpoints.

use std::sync::Arc;

use axum::http::StatusCode;
use waypost_api::{create_router, AppState, Links};
use waypost_core::{Clock, SelectedStore, StoreOptions, TestClock};
use waypost_live::{RegistryConfig, SubscriberRegistry};
use waypost_testing::{
    http::{get, send},
    TestEnv,
};

#[tokio::test]
async fn health_reports_file_backend_as_healthy() {
    let env = TestEnv::new().await.unwrap();
    let app = env.router();

    let response = send(&app, get("/health")).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
    assert_eq!(response.body["checks"]["storage"]["status"], "up");
    assert_eq!(response.body["checks"]["storage"]["backend"], "file");
    assert_eq!(response.body["checks"]["storage"]["database_configured"], false);
    assert_eq!(response.body["checks"]["live"]["subscribers"], 0);
    assert!(response.body["version"].is_string());
}

#[tokio::test]
async fn health_counts_live_subscribers() {
    let env = TestEnv::new().await.unwrap();
    let tracking = env.create_tracking().await.unwrap();
    let _first = env.registry.subscribe(&tracking.tracking_number);
    let _second = env.registry.subscribe(&tracking.tracking_number);
    let app = env.router();

    let response = send(&app, get("/health")).await.unwrap();

    assert_eq!(response.body["checks"]["live"]["subscribers"], 2);
    assert_eq!(response.body["checks"]["live"]["trackings"], 1);
}

#[tokio::test]
async fn health_is_degraded_when_database_unreachable() {
    let dir = tempfile::tempdir().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
    let options = StoreOptions {
        database_url: Some("postgres://waypost@127.0.0.1:1/waypost".to_string()),
        connection_timeout: std::time::Duration::from_millis(200),
        connect_retries: 0,
        data_dir: dir.path().to_path_buf(),
        ..StoreOptions::default()
    };
    let store = Arc::new(SelectedStore::new(options, clock.clone()));
    let registry = Arc::new(SubscriberRegistry::new(RegistryConfig::default(), clock.clone()));
    let state = AppState::new(store, registry, Links::new("http://localhost:5173"), clock);
    let app = create_router(state, std::time::Duration::from_secs(30));

    // The first health request triggers selection.
    let response = send(&app, get("/health")).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "degraded");
    assert_eq!(response.body["checks"]["storage"]["backend"], "file");
    assert_eq!(response.body["checks"]["storage"]["database_configured"], true);
    assert!(response.body["checks"]["storage"]["fallback_reason"]
        .as_str()
        .unwrap()
        .starts_with("database unavailable"));
}

#[tokio::test]
async fn readiness_mirrors_health() {
    let env = TestEnv::new().await.unwrap();
    let app = env.router();

    let response = send(&app, get("/ready")).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
}

#[tokio::test]
async fn liveness_does_not_touch_storage() {
    let env = TestEnv::new().await.unwrap();
    let app = env.router();

    let response = send(&app, get("/live")).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "alive");
    assert_eq!(response.body["service"], "waypost-api");
}

#[tokio::test]
async fn health_timestamp_follows_the_clock() {
    let env = TestEnv::new().await.unwrap();
    let app = env.router();
    env.clock.jump_to(chrono::DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z").unwrap().into());

    let response = send(&app, get("/live")).await.unwrap();

    assert_eq!(response.body["timestamp"], "2030-01-01T00:00:00Z");
}
