//! Tracking operations and the status transition policy.
//!
//! Every mutation goes to the store first and is then broadcast to live
//! subscribers. Broadcasting never fails the request.
//!
//! Moving into `Delivered` records one `Delivered` location. Moving to any
//! other status removes all `Delivered` locations. The steps of a status
//! change are separate store calls: a failure part way through is logged
//! and reported, and nothing is rolled back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};
use waypost_core::{
    CoreError, LocationUpdate, NewTracking, Tracking, TrackingNumber, TrackingStatus,
    TrackingStore, TrackingWithLocations, WaypostError, DELIVERED_LOCATION,
};
use waypost_live::{PushEvent, SubscriberRegistry};

/// Fresh tracking numbers tried after the first one collides.
const MAX_REGENERATIONS: usize = 5;

type Result<T> = std::result::Result<T, WaypostError>;

/// Input for creating a tracking.
#[derive(Debug, Clone)]
pub struct CreateTracking {
    /// Carrier label.
    pub provider: String,
    /// Destination label.
    pub destination: String,
    /// Estimated time of arrival.
    pub eta: DateTime<Utc>,
    /// Creator locale hint.
    pub locale: Option<String>,
    /// Creator timezone hint.
    pub timezone: Option<String>,
}

/// Tracking operations over a store and a subscriber registry.
pub struct TrackingService {
    store: Arc<dyn TrackingStore>,
    registry: Arc<SubscriberRegistry>,
}

impl TrackingService {
    /// Creates a service.
    pub fn new(store: Arc<dyn TrackingStore>, registry: Arc<SubscriberRegistry>) -> Self {
        Self { store, registry }
    }

    /// Creates a tracking with a fresh tracking number and update key.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for blank fields and `DuplicateTrackingNumber`
    /// if every generated number collided.
    #[instrument(name = "create_tracking", skip_all)]
    pub async fn create(&self, input: CreateTracking) -> Result<Tracking> {
        let provider = required("provider", &input.provider)?;
        let destination = required("destination", &input.destination)?;

        let mut new = NewTracking::new(provider, destination, input.eta)
            .with_locale(optional(input.locale))
            .with_timezone(optional(input.timezone));

        let mut attempt = 0;
        loop {
            match self.store.create_tracking(new.clone()).await {
                Ok(id) => {
                    info!(
                        tracking_id = %id,
                        tracking_number = %new.tracking_number,
                        "tracking created"
                    );
                    break;
                },
                Err(CoreError::DuplicateTrackingNumber(number)) if attempt < MAX_REGENERATIONS => {
                    attempt += 1;
                    warn!(
                        tracking_number = %number,
                        attempt,
                        "tracking number taken, regenerating"
                    );
                    new.regenerate_tracking_number();
                },
                Err(CoreError::DuplicateTrackingNumber(tracking_number)) => {
                    return Err(WaypostError::DuplicateTrackingNumber { tracking_number });
                },
                Err(e) => return Err(e.into()),
            }
        }

        self.store
            .find_tracking(&new.tracking_number)
            .await?
            .ok_or_else(|| WaypostError::not_found(&new.tracking_number))
    }

    /// Looks up a tracking with its location history.
    ///
    /// # Errors
    ///
    /// Returns `TrackingNotFound` for unknown numbers.
    pub async fn find(&self, tracking_number: &TrackingNumber) -> Result<TrackingWithLocations> {
        self.store
            .find_tracking_with_locations(tracking_number)
            .await?
            .ok_or_else(|| WaypostError::not_found(tracking_number))
    }

    /// Lists all trackings, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store fails.
    pub async fn list(&self) -> Result<Vec<Tracking>> {
        Ok(self.store.list_trackings().await?)
    }

    /// Checks the update key for a tracking and returns the tracking.
    ///
    /// A missing key is reported before an unknown tracking, and an unknown
    /// tracking before a wrong key.
    ///
    /// # Errors
    ///
    /// Returns `MissingUpdateKey`, `TrackingNotFound` or `InvalidUpdateKey`.
    pub async fn authorize(
        &self,
        tracking_number: &TrackingNumber,
        key: Option<&str>,
    ) -> Result<Tracking> {
        let key = key.filter(|k| !k.is_empty()).ok_or(WaypostError::MissingUpdateKey)?;

        let tracking = self
            .store
            .find_tracking(tracking_number)
            .await?
            .ok_or_else(|| WaypostError::not_found(tracking_number))?;

        if !tracking.update_key.verify(key) {
            warn!(tracking_number = %tracking_number, "update key rejected");
            return Err(WaypostError::InvalidUpdateKey);
        }

        Ok(tracking)
    }

    /// Appends a location and notifies viewers.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a blank location.
    #[instrument(
        name = "add_location",
        skip_all,
        fields(tracking_number = %tracking.tracking_number)
    )]
    pub async fn add_location(
        &self,
        tracking: &Tracking,
        location: &str,
    ) -> Result<LocationUpdate> {
        let location = required("location", location)?;

        let update = self
            .store
            .append_location(tracking.id, &tracking.tracking_number, &location)
            .await
            .map_err(|e| not_found_as_missing(e, &tracking.tracking_number))?;

        self.registry.broadcast(&tracking.tracking_number, PushEvent::location_update(&update));
        Ok(update)
    }

    /// Replaces the ETA and notifies viewers.
    ///
    /// # Errors
    ///
    /// Returns `TrackingNotFound` if the tracking vanished.
    #[instrument(
        name = "update_eta",
        skip_all,
        fields(tracking_number = %tracking.tracking_number)
    )]
    pub async fn update_eta(&self, tracking: &Tracking, eta: DateTime<Utc>) -> Result<Tracking> {
        let number = &tracking.tracking_number;
        if !self.store.update_eta(number, eta).await? {
            return Err(WaypostError::not_found(number));
        }

        self.registry.broadcast(number, PushEvent::eta_change(number, eta));
        self.reload(number).await
    }

    /// Replaces the destination and notifies viewers.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a blank destination and `TrackingNotFound` if
    /// the tracking vanished.
    #[instrument(
        name = "update_destination",
        skip_all,
        fields(tracking_number = %tracking.tracking_number)
    )]
    pub async fn update_destination(
        &self,
        tracking: &Tracking,
        destination: &str,
    ) -> Result<Tracking> {
        let destination = required("destination", destination)?;
        let number = &tracking.tracking_number;
        if !self.store.update_destination(number, &destination).await? {
            return Err(WaypostError::not_found(number));
        }

        self.registry.broadcast(number, PushEvent::destination_change(number, &destination));
        self.reload(number).await
    }

    /// Applies a status change with its location side effects.
    ///
    /// The branch follows the transition from the stored status:
    ///
    /// - into `Delivered`: set the status, record a `Delivered` location,
    ///   then broadcast `status-change` followed by `location-update`.
    /// - out of `Delivered`: set the status, drop all `Delivered` locations,
    ///   broadcast `delivery-removed` if any were dropped, then
    ///   `status-change`.
    /// - anything else, `Delivered` to `Delivered` included: set the status
    ///   and broadcast `status-change`.
    ///
    /// # Errors
    ///
    /// Returns `TrackingNotFound` if the tracking vanished and `Storage` if a
    /// step fails. Steps already applied stay applied.
    #[instrument(
        name = "update_status",
        skip_all,
        fields(tracking_number = %tracking.tracking_number, from = %tracking.status, to = %status)
    )]
    pub async fn update_status(
        &self,
        tracking: &Tracking,
        status: TrackingStatus,
    ) -> Result<TrackingWithLocations> {
        let number = &tracking.tracking_number;
        let previous = tracking.status;
        if !self.store.update_status(number, status).await? {
            return Err(WaypostError::not_found(number));
        }

        match StatusTransition::between(previous, status) {
            StatusTransition::IntoDelivered => {
                let delivered = self.record_delivery(tracking).await?;
                let updated = self.reload(number).await?;

                self.registry.broadcast(
                    number,
                    PushEvent::status_change(number, status, updated.updated_at),
                );
                self.registry.broadcast(number, PushEvent::location_update(&delivered));
            },
            StatusTransition::OutOfDelivered => {
                let removed =
                    self.store.remove_delivered_locations(number).await.map_err(|e| {
                        error!(
                            tracking_number = %number,
                            status = %status,
                            error = %e,
                            "status updated but delivered locations were not removed"
                        );
                        e
                    })?;
                let updated = self.reload(number).await?;

                if removed {
                    debug!(tracking_number = %number, "delivered locations removed");
                    self.registry.broadcast(number, PushEvent::delivery_removed(number));
                }
                self.registry.broadcast(
                    number,
                    PushEvent::status_change(number, status, updated.updated_at),
                );
            },
            StatusTransition::Other => {
                let updated = self.reload(number).await?;
                self.registry.broadcast(
                    number,
                    PushEvent::status_change(number, status, updated.updated_at),
                );
            },
        }

        self.find(number).await
    }

    /// Appends the `Delivered` location for a move into `Delivered`.
    async fn record_delivery(&self, tracking: &Tracking) -> Result<LocationUpdate> {
        let number = &tracking.tracking_number;
        self.store.append_location(tracking.id, number, DELIVERED_LOCATION).await.map_err(|e| {
            error!(
                tracking_number = %number,
                status = %TrackingStatus::Delivered,
                error = %e,
                "status updated but delivered location was not recorded"
            );
            not_found_as_missing(e, number)
        })
    }

    async fn reload(&self, tracking_number: &TrackingNumber) -> Result<Tracking> {
        self.store
            .find_tracking(tracking_number)
            .await?
            .ok_or_else(|| WaypostError::not_found(tracking_number))
    }
}

/// Side effects a status change calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusTransition {
    IntoDelivered,
    OutOfDelivered,
    Other,
}

impl StatusTransition {
    fn between(from: TrackingStatus, to: TrackingStatus) -> Self {
        use TrackingStatus::Delivered;
        match (from, to) {
            (Delivered, Delivered) => Self::Other,
            (_, Delivered) => Self::IntoDelivered,
            (Delivered, _) => Self::OutOfDelivered,
            _ => Self::Other,
        }
    }
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(WaypostError::validation(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn not_found_as_missing(err: CoreError, tracking_number: &TrackingNumber) -> WaypostError {
    match err {
        CoreError::NotFound(_) => WaypostError::not_found(tracking_number),
        other => other.into(),
    }
}
