//! Record store contract and its backends.
//!
//! `TrackingStore` is the single persistence contract. `FileStore` keeps two
//! JSON documents in a data directory, `PostgresStore` keeps two tables.
//! `SelectedStore` picks one of them at startup and forwards every call.
//!
//! All persistence MUST go through these types. Request handlers and the
//! tracking service only ever see `dyn TrackingStore`.

use std::{fmt, path::PathBuf, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod file;
pub mod postgres;
pub mod selector;

pub use file::FileStore;
pub use postgres::PostgresStore;
pub use selector::{SelectedStore, StoreStatus};

use crate::{
    error::Result,
    models::{
        LocationUpdate, NewTracking, Tracking, TrackingId, TrackingNumber, TrackingStatus,
        TrackingWithLocations,
    },
};

/// Which backend a store persists to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// JSON documents in a data directory.
    File,
    /// PostgreSQL tables.
    Postgres,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Postgres => write!(f, "postgres"),
        }
    }
}

/// Settings for backend selection.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// PostgreSQL connection string; `None` selects the file backend.
    pub database_url: Option<String>,

    /// Upper bound on pooled connections.
    pub max_connections: u32,

    /// Connections kept open while idle.
    pub min_connections: u32,

    /// How long to wait for a connection before giving up.
    pub connection_timeout: Duration,

    /// Extra connection attempts after the first one fails.
    pub connect_retries: u32,

    /// Delay between connection attempts.
    pub retry_delay: Duration,

    /// Directory holding the file backend's documents.
    pub data_dir: PathBuf,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            min_connections: 1,
            connection_timeout: Duration::from_secs(5),
            connect_retries: 2,
            retry_delay: Duration::from_secs(1),
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Persistence contract for trackings and their location history.
///
/// Implementations must be safe to call concurrently. Mutations that target
/// an unknown tracking number report `false` (or `NotFound` for appends)
/// instead of creating anything.
#[async_trait]
pub trait TrackingStore: Send + Sync + 'static {
    /// Reports which backend serves the calls.
    ///
    /// # Errors
    ///
    /// Fails if no backend could be bound.
    async fn backend(&self) -> Result<StoreBackend>;

    /// Persists a new tracking with status `Preparing`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::DuplicateTrackingNumber` if the number is taken.
    async fn create_tracking(&self, new: NewTracking) -> Result<TrackingId>;

    /// Looks up a tracking by its public number.
    async fn find_tracking(&self, tracking_number: &TrackingNumber) -> Result<Option<Tracking>>;

    /// Replaces the ETA. Returns `false` if the tracking does not exist.
    async fn update_eta(&self, tracking_number: &TrackingNumber, eta: DateTime<Utc>)
        -> Result<bool>;

    /// Replaces the destination. Returns `false` if the tracking does not exist.
    async fn update_destination(
        &self,
        tracking_number: &TrackingNumber,
        destination: &str,
    ) -> Result<bool>;

    /// Replaces the status without any side effects on the location history.
    ///
    /// Returns `false` if the tracking does not exist.
    async fn update_status(
        &self,
        tracking_number: &TrackingNumber,
        status: TrackingStatus,
    ) -> Result<bool>;

    /// Appends a location update and returns it as stored.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if no tracking matches both the id and
    /// the number.
    async fn append_location(
        &self,
        tracking_id: TrackingId,
        tracking_number: &TrackingNumber,
        location: &str,
    ) -> Result<LocationUpdate>;

    /// Lists location updates sorted ascending by `recorded_at`.
    async fn list_locations(&self, tracking_number: &TrackingNumber)
        -> Result<Vec<LocationUpdate>>;

    /// Removes every `Delivered` location update.
    ///
    /// Returns `true` iff at least one entry was removed.
    async fn remove_delivered_locations(&self, tracking_number: &TrackingNumber) -> Result<bool>;

    /// Lists all trackings, newest first.
    async fn list_trackings(&self) -> Result<Vec<Tracking>>;

    /// Runs a read-only probe against the backend.
    async fn health_check(&self) -> Result<()>;

    /// Looks up a tracking together with its location history.
    async fn find_tracking_with_locations(
        &self,
        tracking_number: &TrackingNumber,
    ) -> Result<Option<TrackingWithLocations>> {
        let Some(tracking) = self.find_tracking(tracking_number).await? else {
            return Ok(None);
        };
        let locations = self.list_locations(tracking_number).await?;

        Ok(Some(TrackingWithLocations { tracking, locations }))
    }

    /// Checks a caller-supplied update key.
    ///
    /// Unknown trackings yield `false`. The comparison runs in constant time.
    async fn verify_update_key(
        &self,
        tracking_number: &TrackingNumber,
        provided: &str,
    ) -> Result<bool> {
        Ok(self
            .find_tracking(tracking_number)
            .await?
            .is_some_and(|tracking| tracking.update_key.verify(provided)))
    }

    /// Returns whether the history already holds a `Delivered` entry.
    async fn has_delivered_location(&self, tracking_number: &TrackingNumber) -> Result<bool> {
        Ok(self
            .list_locations(tracking_number)
            .await?
            .iter()
            .any(LocationUpdate::is_delivered_marker))
    }
}
