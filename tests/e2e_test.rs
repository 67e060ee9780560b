//! End-to-end tests for complete tracking workflows.
//!
//! Exercises the full system from link creation through live updates,
//! delivery and un-delivery, and a service restart over the same data.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::http::{Method, StatusCode};
use serde_json::json;
use waypost_api::{create_router, start_server, AppState, Links};
use waypost_core::{Clock, RealClock, SelectedStore, StoreOptions};
use waypost_live::{RegistryConfig, SubscriberRegistry};
use waypost_testing::{
    fixtures::create_request_body,
    http::{get, json, send},
    EventStreamReader, TestEnv,
};

const WAIT: Duration = Duration::from_secs(2);

fn state_over(data_dir: &std::path::Path) -> AppState {
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let options = StoreOptions { data_dir: data_dir.to_path_buf(), ..StoreOptions::default() };
    let store = Arc::new(SelectedStore::new(options, clock.clone()));
    let registry = Arc::new(SubscriberRegistry::new(RegistryConfig::default(), clock.clone()));
    AppState::new(store, registry, Links::new("https://waypost.example"), clock)
}

/// The golden path: a sender creates a link, a viewer watches it, the
/// sender moves the parcel along and marks it delivered.
#[tokio::test]
async fn golden_tracking_lifecycle() -> Result<()> {
    let env = TestEnv::new().await?;
    let app = env.router();

    // Sender creates the link
    let created = send(&app, json(Method::POST, "/api/tracking", &create_request_body())).await?;
    assert_eq!(created.status, StatusCode::CREATED);
    let number = created.body["trackingNumber"].as_str().context("tracking number")?.to_string();
    let update_link = created.body["updateLink"].as_str().context("update link")?;
    let key = update_link.rsplit_once("key=").context("key in update link")?.1.to_string();

    // Viewer opens the share link and subscribes
    let viewed = send(&app, get(&format!("/api/tracking/{number}"))).await?;
    assert_eq!(viewed.status, StatusCode::OK);
    assert_eq!(viewed.body["locations"], json!([]));

    let mut stream =
        EventStreamReader::open(&app, &format!("/api/tracking/{number}/events")).await?;
    assert_eq!(stream.expect_frame(WAIT).await?.event, "connected");

    // Sender moves the parcel along
    for (method, path, body) in [
        (Method::PUT, "status", json!({ "status": "In Transit" })),
        (Method::POST, "location", json!({ "location": "Paris" })),
        (Method::POST, "location", json!({ "location": "Lyon" })),
        (Method::PUT, "status", json!({ "status": "Out for Delivery" })),
    ] {
        let uri = format!("/api/tracking/{number}/{path}?key={key}");
        let response = send(&app, json(method, &uri, &body)).await?;
        assert_eq!(response.status, StatusCode::OK, "{uri} failed: {}", response.body);
    }

    let expected = [
        ("status-change", "status", "In Transit"),
        ("location-update", "location", "Paris"),
        ("location-update", "location", "Lyon"),
        ("status-change", "status", "Out for Delivery"),
    ];
    for (event, field, value) in expected {
        let frame = stream.expect_frame(WAIT).await?;
        assert_eq!(frame.event, event);
        assert_eq!(frame.data[field], value);
    }

    // Delivery records the marker once
    let uri = format!("/api/tracking/{number}/status?key={key}");
    for _ in 0..2 {
        let delivered =
            send(&app, json(Method::PUT, &uri, &json!({ "status": "Delivered" }))).await?;
        assert_eq!(delivered.status, StatusCode::OK);
    }

    let viewed = send(&app, get(&format!("/api/tracking/{number}"))).await?;
    assert_eq!(viewed.body["status"], "Delivered");
    let labels: Vec<&str> = viewed.body["locations"]
        .as_array()
        .context("locations")?
        .iter()
        .filter_map(|l| l["location"].as_str())
        .collect();
    assert_eq!(labels, ["Paris", "Lyon", "Delivered"]);

    // A mistaken delivery is walked back
    let delayed = send(&app, json(Method::PUT, &uri, &json!({ "status": "Delayed" }))).await?;
    assert_eq!(delayed.status, StatusCode::OK);
    let labels: Vec<&str> = delayed.body["locations"]
        .as_array()
        .context("locations")?
        .iter()
        .filter_map(|l| l["location"].as_str())
        .collect();
    assert_eq!(labels, ["Paris", "Lyon"]);

    Ok(())
}

/// Trackings written by one process are served by the next one over the
/// same data directory.
#[tokio::test]
async fn trackings_survive_restart() -> Result<()> {
    let data_dir = tempfile::tempdir()?;

    let number = {
        let app = create_router(state_over(data_dir.path()), Duration::from_secs(30));
        let created =
            send(&app, json(Method::POST, "/api/tracking", &create_request_body())).await?;
        let number =
            created.body["trackingNumber"].as_str().context("tracking number")?.to_string();
        let key = created.body["updateLink"]
            .as_str()
            .and_then(|link| link.rsplit_once("key="))
            .context("key in update link")?
            .1
            .to_string();

        let uri = format!("/api/tracking/{number}/location?key={key}");
        let added = send(&app, json(Method::POST, &uri, &json!({ "location": "Depot" }))).await?;
        assert_eq!(added.status, StatusCode::OK);
        number
    };

    let app = create_router(state_over(data_dir.path()), Duration::from_secs(30));
    let viewed = send(&app, get(&format!("/api/tracking/{number}"))).await?;

    assert_eq!(viewed.status, StatusCode::OK);
    assert_eq!(viewed.body["shareLink"], format!("https://waypost.example/track/{number}"));
    assert_eq!(viewed.body["locations"][0]["location"], "Depot");

    Ok(())
}

/// The server binds, serves and stops when the shutdown future completes.
#[tokio::test]
async fn server_stops_on_shutdown() -> Result<()> {
    let data_dir = tempfile::tempdir()?;
    let state = state_over(data_dir.path());
    let registry = state.registry.clone();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(start_server(
        state,
        "127.0.0.1:0".parse()?,
        Duration::from_secs(30),
        async move {
            let _ = stopped.await;
            registry.close_all();
        },
    ));

    let _ = stop.send(());
    tokio::time::timeout(WAIT, server).await???;

    Ok(())
}
