//! Startup backend selection behind a one-shot gate.
//!
//! `SelectedStore` resolves to PostgreSQL when a database URL is configured
//! and reachable, and to the file backend otherwise. Resolution runs once;
//! calls issued while it is in flight wait for it and then proceed against
//! whichever backend was chosen.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use super::{FileStore, PostgresStore, StoreBackend, StoreOptions, TrackingStore};
use crate::{
    error::Result,
    models::{
        LocationUpdate, NewTracking, Tracking, TrackingId, TrackingNumber, TrackingStatus,
        TrackingWithLocations,
    },
    time::Clock,
};

/// Snapshot of the selection outcome for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    /// Whether selection has completed.
    pub resolved: bool,
    /// The chosen backend, once resolved.
    pub backend: Option<StoreBackend>,
    /// Whether a database URL was configured at all.
    pub database_configured: bool,
    /// Why the file backend was chosen, if it was.
    pub fallback_reason: Option<String>,
}

impl StoreStatus {
    /// True when a configured database could not be used.
    pub fn is_degraded(&self) -> bool {
        self.database_configured && self.backend == Some(StoreBackend::File)
    }
}

struct Selection {
    store: Arc<dyn TrackingStore>,
    backend: StoreBackend,
    postgres: Option<PostgresStore>,
    fallback_reason: Option<String>,
}

/// Tracking store that binds to a backend on first use.
pub struct SelectedStore {
    options: StoreOptions,
    clock: Arc<dyn Clock>,
    selection: OnceCell<Selection>,
}

impl SelectedStore {
    /// Creates an unresolved store. Nothing is connected until the first call
    /// or an explicit [`SelectedStore::resolve`].
    pub fn new(options: StoreOptions, clock: Arc<dyn Clock>) -> Self {
        Self { options, clock, selection: OnceCell::new() }
    }

    /// Runs selection if it has not run yet and returns the bound backend.
    ///
    /// # Errors
    ///
    /// Fails only if the file backend cannot be opened either. A failed
    /// resolution leaves the gate closed so the next call tries again.
    pub async fn resolve(&self) -> Result<StoreBackend> {
        Ok(self.selected().await?.backend)
    }

    /// Reports the selection outcome without triggering it.
    pub fn status(&self) -> StoreStatus {
        let database_configured = self.options.database_url.is_some();
        match self.selection.get() {
            Some(selection) => StoreStatus {
                resolved: true,
                backend: Some(selection.backend),
                database_configured,
                fallback_reason: selection.fallback_reason.clone(),
            },
            None => StoreStatus {
                resolved: false,
                backend: None,
                database_configured,
                fallback_reason: None,
            },
        }
    }

    /// Closes the database pool if PostgreSQL was selected.
    pub async fn close(&self) {
        if let Some(postgres) = self.selection.get().and_then(|s| s.postgres.as_ref()) {
            postgres.close().await;
            info!("database connections closed");
        }
    }

    async fn selected(&self) -> Result<&Selection> {
        self.selection.get_or_try_init(|| self.select()).await.inspect_err(|e| {
            error!(
                data_dir = %self.options.data_dir.display(),
                error = %e,
                "no tracking store could be opened"
            );
        })
    }

    async fn store(&self) -> Result<&Arc<dyn TrackingStore>> {
        Ok(&self.selected().await?.store)
    }

    async fn select(&self) -> Result<Selection> {
        let fallback_reason = match self.options.database_url.as_deref() {
            Some(url) => match self.open_postgres(url).await {
                Ok(postgres) => {
                    info!(backend = %StoreBackend::Postgres, "tracking store selected");
                    return Ok(Selection {
                        store: Arc::new(postgres.clone()),
                        backend: StoreBackend::Postgres,
                        postgres: Some(postgres),
                        fallback_reason: None,
                    });
                },
                Err(e) => {
                    warn!(error = %e, "database unavailable, falling back to file store");
                    format!("database unavailable: {e}")
                },
            },
            None => "no database URL configured".to_string(),
        };

        let file = FileStore::open(&self.options.data_dir, self.clock.clone()).await?;
        info!(
            backend = %StoreBackend::File,
            data_dir = %self.options.data_dir.display(),
            reason = %fallback_reason,
            "tracking store selected"
        );

        Ok(Selection {
            store: Arc::new(file),
            backend: StoreBackend::File,
            postgres: None,
            fallback_reason: Some(fallback_reason),
        })
    }

    async fn open_postgres(&self, url: &str) -> Result<PostgresStore> {
        let postgres = PostgresStore::connect(url, &self.options).await?;
        let probe = async {
            postgres.bootstrap_schema().await?;
            postgres.health_check().await
        };

        match probe.await {
            Ok(()) => Ok(postgres),
            Err(e) => {
                postgres.close().await;
                Err(e)
            },
        }
    }
}

#[async_trait]
impl TrackingStore for SelectedStore {
    async fn backend(&self) -> Result<StoreBackend> {
        self.resolve().await
    }

    async fn create_tracking(&self, new: NewTracking) -> Result<TrackingId> {
        self.store().await?.create_tracking(new).await
    }

    async fn find_tracking(&self, tracking_number: &TrackingNumber) -> Result<Option<Tracking>> {
        self.store().await?.find_tracking(tracking_number).await
    }

    async fn update_eta(
        &self,
        tracking_number: &TrackingNumber,
        eta: DateTime<Utc>,
    ) -> Result<bool> {
        self.store().await?.update_eta(tracking_number, eta).await
    }

    async fn update_destination(
        &self,
        tracking_number: &TrackingNumber,
        destination: &str,
    ) -> Result<bool> {
        self.store().await?.update_destination(tracking_number, destination).await
    }

    async fn update_status(
        &self,
        tracking_number: &TrackingNumber,
        status: TrackingStatus,
    ) -> Result<bool> {
        self.store().await?.update_status(tracking_number, status).await
    }

    async fn append_location(
        &self,
        tracking_id: TrackingId,
        tracking_number: &TrackingNumber,
        location: &str,
    ) -> Result<LocationUpdate> {
        self.store().await?.append_location(tracking_id, tracking_number, location).await
    }

    async fn list_locations(
        &self,
        tracking_number: &TrackingNumber,
    ) -> Result<Vec<LocationUpdate>> {
        self.store().await?.list_locations(tracking_number).await
    }

    async fn remove_delivered_locations(&self, tracking_number: &TrackingNumber) -> Result<bool> {
        self.store().await?.remove_delivered_locations(tracking_number).await
    }

    async fn list_trackings(&self) -> Result<Vec<Tracking>> {
        self.store().await?.list_trackings().await
    }

    async fn health_check(&self) -> Result<()> {
        self.store().await?.health_check().await
    }

    async fn find_tracking_with_locations(
        &self,
        tracking_number: &TrackingNumber,
    ) -> Result<Option<TrackingWithLocations>> {
        self.store().await?.find_tracking_with_locations(tracking_number).await
    }
}
