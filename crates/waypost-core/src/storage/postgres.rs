//! PostgreSQL backend.
//!
//! Two tables: `trackings` keyed by a UUID with a unique `tracking_number`,
//! and `location_updates` referencing `trackings(id)` with cascade delete.
//! Every mutation refreshes `updated_at = NOW()`. Multi-statement sequences
//! are left to the caller and are not wrapped in a transaction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use super::{StoreBackend, StoreOptions, TrackingStore};
use crate::{
    error::{CoreError, Result},
    models::{
        LocationId, LocationUpdate, NewTracking, Tracking, TrackingId, TrackingNumber,
        TrackingStatus, DELIVERED_LOCATION,
    },
};

const TRACKING_COLUMNS: &str = "id, tracking_number, provider, destination, eta, status, \
                                update_key, creator_locale, creator_timezone, created_at, \
                                updated_at";

/// Tracking store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    /// Creates a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Connects to `database_url`, retrying up to `options.connect_retries`
    /// extra times.
    ///
    /// # Errors
    ///
    /// Returns the last connection error once retries are exhausted.
    pub async fn connect(database_url: &str, options: &StoreOptions) -> Result<Self> {
        let mut attempt = 0;

        loop {
            match PgPoolOptions::new()
                .max_connections(options.max_connections)
                .min_connections(options.min_connections)
                .acquire_timeout(options.connection_timeout)
                .connect(database_url)
                .await
            {
                Ok(pool) => return Ok(Self::new(pool)),
                Err(e) if attempt < options.connect_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = options.connect_retries,
                        error = %e,
                        "database connection failed, retrying"
                    );
                    tokio::time::sleep(options.retry_delay).await;
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Creates tables and indexes if they do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if any statement fails.
    pub async fn bootstrap_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trackings (
                id UUID PRIMARY KEY,
                tracking_number TEXT NOT NULL UNIQUE,
                provider TEXT NOT NULL,
                destination TEXT NOT NULL,
                eta TIMESTAMPTZ NOT NULL,
                status TEXT NOT NULL DEFAULT 'Preparing',
                update_key TEXT NOT NULL,
                creator_locale TEXT,
                creator_timezone TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&*self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS location_updates (
                id UUID PRIMARY KEY,
                tracking_id UUID NOT NULL REFERENCES trackings(id) ON DELETE CASCADE,
                tracking_number TEXT NOT NULL,
                location TEXT NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&*self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_location_updates_tracking
            ON location_updates(tracking_number, recorded_at)
            "#,
        )
        .execute(&*self.pool)
        .await?;

        info!("tracking schema ready");
        Ok(())
    }

    /// Closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl TrackingStore for PostgresStore {
    async fn backend(&self) -> Result<StoreBackend> {
        Ok(StoreBackend::Postgres)
    }

    async fn create_tracking(&self, new: NewTracking) -> Result<TrackingId> {
        let result = sqlx::query_scalar(
            r#"
            INSERT INTO trackings (
                id, tracking_number, provider, destination, eta, status,
                update_key, creator_locale, creator_timezone
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(TrackingId::new().0)
        .bind(new.tracking_number.as_str())
        .bind(&new.provider)
        .bind(&new.destination)
        .bind(new.eta)
        .bind(TrackingStatus::Preparing.as_str())
        .bind(new.update_key.expose())
        .bind(&new.creator_locale)
        .bind(&new.creator_timezone)
        .fetch_one(&*self.pool)
        .await;

        match result {
            Ok(id) => Ok(TrackingId(id)),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(CoreError::DuplicateTrackingNumber(new.tracking_number))
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn find_tracking(&self, tracking_number: &TrackingNumber) -> Result<Option<Tracking>> {
        let tracking = sqlx::query_as::<_, Tracking>(&format!(
            "SELECT {TRACKING_COLUMNS} FROM trackings WHERE tracking_number = $1"
        ))
        .bind(tracking_number.as_str())
        .fetch_optional(&*self.pool)
        .await?;

        Ok(tracking)
    }

    async fn update_eta(
        &self,
        tracking_number: &TrackingNumber,
        eta: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE trackings SET eta = $2, updated_at = NOW() WHERE tracking_number = $1",
        )
        .bind(tracking_number.as_str())
        .bind(eta)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_destination(
        &self,
        tracking_number: &TrackingNumber,
        destination: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE trackings SET destination = $2, updated_at = NOW() WHERE tracking_number = $1",
        )
        .bind(tracking_number.as_str())
        .bind(destination)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_status(
        &self,
        tracking_number: &TrackingNumber,
        status: TrackingStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE trackings SET status = $2, updated_at = NOW() WHERE tracking_number = $1",
        )
        .bind(tracking_number.as_str())
        .bind(status.as_str())
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_location(
        &self,
        tracking_id: TrackingId,
        tracking_number: &TrackingNumber,
        location: &str,
    ) -> Result<LocationUpdate> {
        // Inserting through a SELECT yields no row for an unknown tracking
        // instead of a foreign key violation.
        let update = sqlx::query_as::<_, LocationUpdate>(
            r#"
            INSERT INTO location_updates (id, tracking_id, tracking_number, location)
            SELECT $1, t.id, t.tracking_number, $4
            FROM trackings t
            WHERE t.id = $2 AND t.tracking_number = $3
            RETURNING id, tracking_id, tracking_number, location, recorded_at
            "#,
        )
        .bind(LocationId::new().0)
        .bind(tracking_id.0)
        .bind(tracking_number.as_str())
        .bind(location)
        .fetch_optional(&*self.pool)
        .await?;

        update.ok_or_else(|| CoreError::NotFound(format!("tracking {tracking_number}")))
    }

    async fn list_locations(
        &self,
        tracking_number: &TrackingNumber,
    ) -> Result<Vec<LocationUpdate>> {
        let updates = sqlx::query_as::<_, LocationUpdate>(
            r#"
            SELECT id, tracking_id, tracking_number, location, recorded_at
            FROM location_updates
            WHERE tracking_number = $1
            ORDER BY recorded_at ASC, ctid ASC
            "#,
        )
        .bind(tracking_number.as_str())
        .fetch_all(&*self.pool)
        .await?;

        Ok(updates)
    }

    async fn remove_delivered_locations(&self, tracking_number: &TrackingNumber) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM location_updates WHERE tracking_number = $1 AND location = $2")
                .bind(tracking_number.as_str())
                .bind(DELIVERED_LOCATION)
                .execute(&*self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_trackings(&self) -> Result<Vec<Tracking>> {
        let trackings = sqlx::query_as::<_, Tracking>(&format!(
            "SELECT {TRACKING_COLUMNS} FROM trackings ORDER BY created_at DESC"
        ))
        .fetch_all(&*self.pool)
        .await?;

        Ok(trackings)
    }

    async fn health_check(&self) -> Result<()> {
        let _: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM trackings").fetch_one(&*self.pool).await?;

        Ok(())
    }
}
