//! Health check handlers for service monitoring.
//!
//! Reports the selected storage backend, why the file fallback was taken if
//! it was, and live subscriber counts.

use std::{sync::Arc, time::Instant};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, instrument};
use waypost_core::{Clock, SelectedStore, StoreBackend, TrackingStore};
use waypost_live::SubscriberRegistry;

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Individual component health checks
    pub checks: HealthChecks,
    /// Service version information
    pub version: String,
}

/// Overall health status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Serving from the file backend although a database is configured
    Degraded,
    /// Storage is failing
    Unhealthy,
}

/// Individual component health check results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Record store probe
    pub storage: StorageHealth,
    /// Live subscriber registry
    pub live: LiveHealth,
}

/// Record store health.
#[derive(Debug, Serialize)]
pub struct StorageHealth {
    /// Component status
    pub status: ComponentStatus,
    /// Selected backend, once resolved
    pub backend: Option<StoreBackend>,
    /// Whether a database URL is configured
    pub database_configured: bool,
    /// Why the file backend was selected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    /// Optional error message if down
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response time in milliseconds
    pub response_time_ms: u64,
}

/// Live subscriber statistics.
#[derive(Debug, Serialize)]
pub struct LiveHealth {
    /// Open event streams
    pub subscribers: usize,
    /// Tracking numbers with at least one open stream
    pub trackings: usize,
}

/// Component-level health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy
    Up,
    /// Component is experiencing issues
    Down,
}

/// Health service that encapsulates clock dependency for testable health
/// checks.
pub struct HealthService {
    clock: Arc<dyn Clock>,
}

impl HealthService {
    /// Creates a new health service with the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Probes storage and summarizes live subscribers.
    pub async fn health_check(
        &self,
        store: &SelectedStore,
        registry: &SubscriberRegistry,
    ) -> HealthResponse {
        debug!("Performing health check");

        let timestamp = self.clock.now_utc();
        let storage = Self::check_storage(store).await;

        let status = match storage.status {
            ComponentStatus::Down => HealthStatus::Unhealthy,
            ComponentStatus::Up if store.status().is_degraded() => HealthStatus::Degraded,
            ComponentStatus::Up => HealthStatus::Healthy,
        };

        HealthResponse {
            status,
            timestamp,
            checks: HealthChecks {
                storage,
                live: LiveHealth {
                    subscribers: registry.total_subscribers(),
                    trackings: registry.tracking_count(),
                },
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Runs the store's read-only probe. Resolves the selection first if it
    /// has not happened yet.
    async fn check_storage(store: &SelectedStore) -> StorageHealth {
        let start = Instant::now();
        let result = store.health_check().await;
        let response_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let selection = store.status();

        let (status, message) = match result {
            Ok(()) => {
                debug!(backend = ?selection.backend, "Storage health check passed");
                (ComponentStatus::Up, None)
            },
            Err(e) => {
                error!("Storage health check failed: {}", e);
                (ComponentStatus::Down, Some(format!("Storage probe failed: {e}")))
            },
        };

        StorageHealth {
            status,
            backend: selection.backend,
            database_configured: selection.database_configured,
            fallback_reason: selection.fallback_reason,
            message,
            response_time_ms,
        }
    }
}

/// Health check endpoint handler.
#[instrument(name = "health_check", skip(app_state))]
pub async fn health_check(State(app_state): State<AppState>) -> Response {
    let health_service = HealthService::new(app_state.clock.clone());
    let response = health_service.health_check(&app_state.store, &app_state.registry).await;

    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(
        status = ?response.status,
        storage_status = ?response.checks.storage.status,
        "Health check completed"
    );

    (status_code, Json(response)).into_response()
}

/// Readiness check endpoint.
///
/// The service can take traffic once a backend is selected and answers its
/// probe, which is exactly what the health check verifies.
#[instrument(name = "readiness_check", skip(app_state))]
pub async fn readiness_check(State(app_state): State<AppState>) -> Response {
    health_check(State(app_state)).await
}

/// Liveness check endpoint.
///
/// Does not touch storage.
#[instrument(name = "liveness_check", skip(app_state))]
pub async fn liveness_check(State(app_state): State<AppState>) -> Response {
    debug!("Performing liveness check");

    let response = serde_json::json!({
        "status": "alive",
        "timestamp": app_state.clock.now_utc(),
        "service": "waypost-api"
    });

    (StatusCode::OK, Json(response)).into_response()
}
