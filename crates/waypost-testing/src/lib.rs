//! Test infrastructure for Waypost.
//!
//! `TestEnv` wires a file-backed store in a temporary directory, a
//! deterministic clock and a subscriber registry into a ready router.
//! `contract` holds the behavioural suite every `TrackingStore` backend must
//! pass, and `http` drives the router in-process.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::Router;
use tempfile::TempDir;
use waypost_api::{create_router, AppState, CreateTracking, Links, TrackingService};
use waypost_core::{Clock, SelectedStore, StoreOptions, TestClock, Tracking};
use waypost_live::{RegistryConfig, SubscriberRegistry};

pub mod contract;
pub mod fixtures;
pub mod http;

pub use fixtures::TrackingBuilder;
pub use http::{EventStreamReader, SseFrame, TestResponse};

/// Frontend origin used for links unless overridden.
pub const TEST_FRONTEND_URL: &str = "http://localhost:5173";

/// Self-contained service environment for integration tests.
///
/// The data directory is removed when the environment is dropped.
pub struct TestEnv {
    /// Deterministic clock shared by the store, registry and health checks
    pub clock: TestClock,
    /// Selected store, already resolved to the file backend
    pub store: Arc<SelectedStore>,
    /// Live subscriber registry
    pub registry: Arc<SubscriberRegistry>,
    state: AppState,
    data_dir: TempDir,
}

impl TestEnv {
    /// Creates an environment with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory or store cannot be set up.
    pub async fn new() -> Result<Self> {
        TestEnvBuilder::new().build().await
    }

    /// Starts building an environment with custom settings.
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::new()
    }

    /// Returns a router over this environment's state.
    pub fn router(&self) -> Router {
        create_router(self.state.clone(), Duration::from_secs(30))
    }

    /// Returns the shared application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Returns the tracking service.
    pub fn service(&self) -> &TrackingService {
        &self.state.service
    }

    /// Returns the directory holding the file backend's documents.
    pub fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    /// Creates a tracking with the default delivery through the service.
    ///
    /// # Errors
    ///
    /// Returns an error if the service rejects the input.
    pub async fn create_tracking(&self) -> Result<Tracking> {
        let tracking = self
            .service()
            .create(CreateTracking {
                provider: fixtures::DEFAULT_PROVIDER.to_string(),
                destination: fixtures::DEFAULT_DESTINATION.to_string(),
                eta: fixtures::default_eta(),
                locale: None,
                timezone: None,
            })
            .await?;
        Ok(tracking)
    }

    /// Advances the test clock.
    pub fn advance_time(&self, duration: Duration) {
        self.clock.advance(duration);
    }
}

/// Builder for [`TestEnv`].
#[derive(Debug, Clone)]
pub struct TestEnvBuilder {
    registry: RegistryConfig,
    frontend_url: String,
}

impl TestEnvBuilder {
    /// Starts from the default settings.
    pub fn new() -> Self {
        Self { registry: RegistryConfig::default(), frontend_url: TEST_FRONTEND_URL.to_string() }
    }

    /// Sets the heartbeat period.
    #[must_use]
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.registry.keepalive_interval = interval;
        self
    }

    /// Sets the per-subscriber queue size.
    #[must_use]
    pub fn subscriber_buffer(mut self, buffer: usize) -> Self {
        self.registry.buffer = buffer;
        self
    }

    /// Sets the frontend origin for links.
    #[must_use]
    pub fn frontend_url(mut self, url: impl Into<String>) -> Self {
        self.frontend_url = url.into();
        self
    }

    /// Builds the environment and resolves the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory or store cannot be set up.
    pub async fn build(self) -> Result<TestEnv> {
        let data_dir = tempfile::tempdir().context("failed to create data directory")?;
        let clock = TestClock::new();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

        let options = StoreOptions {
            database_url: None,
            data_dir: data_dir.path().to_path_buf(),
            ..StoreOptions::default()
        };
        let store = Arc::new(SelectedStore::new(options, shared_clock.clone()));
        store.resolve().await.context("failed to resolve test store")?;

        let registry = Arc::new(SubscriberRegistry::new(self.registry, shared_clock.clone()));
        let state = AppState::new(
            store.clone(),
            registry.clone(),
            Links::new(self.frontend_url),
            shared_clock,
        );

        Ok(TestEnv { clock, store, registry, state, data_dir })
    }
}

impl Default for TestEnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}
