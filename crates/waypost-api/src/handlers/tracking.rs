//! Tracking CRUD handlers.
//!
//! Read endpoints are public. Update endpoints take an `AuthorizedTracking`,
//! which runs before the body is parsed, so key errors (401/404/403) win
//! over body errors (400).

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use waypost_core::{
    LocationId, LocationUpdate, Tracking, TrackingNumber, TrackingStatus, TrackingWithLocations,
};

use crate::{
    error::ApiError, links::Links, middleware::AuthorizedTracking, service::CreateTracking,
    AppState,
};

/// Request body for creating a tracking.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTrackingRequest {
    /// Carrier label.
    pub provider: String,
    /// Destination label.
    pub destination: String,
    /// Estimated time of arrival, RFC 3339.
    pub eta: DateTime<Utc>,
    /// Creator locale hint.
    #[serde(default)]
    pub locale: Option<String>,
    /// Creator timezone hint.
    #[serde(default)]
    pub timezone: Option<String>,
}

/// Request body for appending a location.
#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    /// Free-text location label.
    pub location: String,
}

/// Request body for changing the ETA.
#[derive(Debug, Deserialize)]
pub struct EtaRequest {
    /// New estimated time of arrival, RFC 3339.
    pub eta: DateTime<Utc>,
}

/// Request body for changing the destination.
#[derive(Debug, Deserialize)]
pub struct DestinationRequest {
    /// New destination label.
    pub destination: String,
}

/// Request body for changing the status.
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    /// One of the five status labels.
    pub status: TrackingStatus,
}

/// A location update as returned to clients.
#[derive(Debug, Serialize)]
pub struct LocationView {
    /// Location update id.
    pub id: LocationId,
    /// Free-text location label.
    pub location: String,
    /// When the update was recorded.
    pub timestamp: DateTime<Utc>,
}

impl From<&LocationUpdate> for LocationView {
    fn from(update: &LocationUpdate) -> Self {
        Self { id: update.id, location: update.location.clone(), timestamp: update.recorded_at }
    }
}

/// A tracking as returned to clients.
///
/// Never contains the update key except inside `updateLink`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingView {
    /// Public tracking number.
    pub tracking_number: TrackingNumber,
    /// Carrier label.
    pub provider: String,
    /// Destination label.
    pub destination: String,
    /// Estimated time of arrival.
    pub eta: DateTime<Utc>,
    /// Current status.
    pub status: TrackingStatus,
    /// Creator locale hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_locale: Option<String>,
    /// Creator timezone hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_timezone: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Public read-only link.
    pub share_link: String,
    /// Private link carrying the update key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_link: Option<String>,
    /// Location history, oldest first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<LocationView>>,
}

impl TrackingView {
    /// Builds the public view of a tracking.
    pub fn new(tracking: &Tracking, links: &Links) -> Self {
        Self {
            tracking_number: tracking.tracking_number.clone(),
            provider: tracking.provider.clone(),
            destination: tracking.destination.clone(),
            eta: tracking.eta,
            status: tracking.status,
            creator_locale: tracking.creator_locale.clone(),
            creator_timezone: tracking.creator_timezone.clone(),
            created_at: tracking.created_at,
            updated_at: tracking.updated_at,
            share_link: links.share_link(&tracking.tracking_number),
            update_link: None,
            locations: None,
        }
    }

    /// Builds the public view with its location history.
    pub fn with_history(full: &TrackingWithLocations, links: &Links) -> Self {
        let mut view = Self::new(&full.tracking, links);
        view.locations = Some(full.locations.iter().map(LocationView::from).collect());
        view
    }

    /// Adds the update link. Only for callers that already hold the key.
    #[must_use]
    pub fn with_update_link(mut self, tracking: &Tracking, links: &Links) -> Self {
        self.update_link = Some(links.update_link(&tracking.tracking_number, &tracking.update_key));
        self
    }
}

/// Creates a tracking and returns both links.
///
/// # Errors
///
/// - 400: missing or blank field, malformed `eta`
/// - 409: no free tracking number found
/// - 500: storage failure
#[instrument(name = "create_tracking_handler", skip_all)]
pub async fn create_tracking(
    State(state): State<AppState>,
    payload: Result<Json<CreateTrackingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TrackingView>), ApiError> {
    let Json(request) = payload?;

    let tracking = state
        .service
        .create(CreateTracking {
            provider: request.provider,
            destination: request.destination,
            eta: request.eta,
            locale: request.locale,
            timezone: request.timezone,
        })
        .await?;

    let view = TrackingView::new(&tracking, &state.links).with_update_link(&tracking, &state.links);
    Ok((StatusCode::CREATED, Json(view)))
}

/// Returns the public view of a tracking with its history.
///
/// # Errors
///
/// - 404: unknown tracking number
#[instrument(name = "get_tracking", skip(state))]
pub async fn get_tracking(
    Path(tracking_number): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<TrackingView>, ApiError> {
    let full = state.service.find(&TrackingNumber::from(tracking_number)).await?;
    Ok(Json(TrackingView::with_history(&full, &state.links)))
}

/// Returns the view for the update page, including the update link.
///
/// # Errors
///
/// - 401: no key, 404: unknown tracking, 403: wrong key
#[instrument(
    name = "get_tracking_for_update",
    skip_all,
    fields(tracking_number = %tracking.tracking_number)
)]
pub async fn get_tracking_for_update(
    State(state): State<AppState>,
    AuthorizedTracking(tracking): AuthorizedTracking,
) -> Result<Json<TrackingView>, ApiError> {
    let full = state.service.find(&tracking.tracking_number).await?;
    let view = TrackingView::with_history(&full, &state.links)
        .with_update_link(&full.tracking, &state.links);
    Ok(Json(view))
}

/// Appends a location waypoint.
///
/// # Errors
///
/// - 401/404/403 from authorization, 400: missing or blank `location`
#[instrument(name = "add_location", skip_all, fields(tracking_number = %tracking.tracking_number))]
pub async fn add_location(
    State(state): State<AppState>,
    AuthorizedTracking(tracking): AuthorizedTracking,
    payload: Result<Json<LocationRequest>, JsonRejection>,
) -> Result<Json<LocationView>, ApiError> {
    let Json(request) = payload?;

    let update = state.service.add_location(&tracking, &request.location).await?;
    debug!(location_id = %update.id, "location appended");

    Ok(Json(LocationView::from(&update)))
}

/// Changes the ETA.
///
/// # Errors
///
/// - 401/404/403 from authorization, 400: missing or malformed `eta`
#[instrument(name = "update_eta", skip_all, fields(tracking_number = %tracking.tracking_number))]
pub async fn update_eta(
    State(state): State<AppState>,
    AuthorizedTracking(tracking): AuthorizedTracking,
    payload: Result<Json<EtaRequest>, JsonRejection>,
) -> Result<Json<TrackingView>, ApiError> {
    let Json(request) = payload?;

    let updated = state.service.update_eta(&tracking, request.eta).await?;
    Ok(Json(TrackingView::new(&updated, &state.links)))
}

/// Changes the destination.
///
/// # Errors
///
/// - 401/404/403 from authorization, 400: missing or blank `destination`
#[instrument(
    name = "update_destination",
    skip_all,
    fields(tracking_number = %tracking.tracking_number)
)]
pub async fn update_destination(
    State(state): State<AppState>,
    AuthorizedTracking(tracking): AuthorizedTracking,
    payload: Result<Json<DestinationRequest>, JsonRejection>,
) -> Result<Json<TrackingView>, ApiError> {
    let Json(request) = payload?;

    let updated = state.service.update_destination(&tracking, &request.destination).await?;
    Ok(Json(TrackingView::new(&updated, &state.links)))
}

/// Changes the status, applying the `Delivered` location rules.
///
/// # Errors
///
/// - 401/404/403 from authorization, 400: missing or unknown `status`
#[instrument(name = "update_status", skip_all, fields(tracking_number = %tracking.tracking_number))]
pub async fn update_status(
    State(state): State<AppState>,
    AuthorizedTracking(tracking): AuthorizedTracking,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<TrackingView>, ApiError> {
    let Json(request) = payload?;

    let full = state.service.update_status(&tracking, request.status).await?;
    Ok(Json(TrackingView::with_history(&full, &state.links)))
}

/// Lists every tracking for diagnostics. Update links are never included.
///
/// # Errors
///
/// - 500: storage failure
#[instrument(name = "list_trackings", skip_all)]
pub async fn list_trackings(
    State(state): State<AppState>,
) -> Result<Json<Vec<TrackingView>>, ApiError> {
    let trackings = state.service.list().await?;
    Ok(Json(trackings.iter().map(|t| TrackingView::new(t, &state.links)).collect()))
}

#[cfg(test)]
mod tests {
    use waypost_core::{TrackingId, UpdateKey};

    use super::*;

    fn tracking() -> Tracking {
        let now = Utc::now();
        Tracking {
            id: TrackingId::new(),
            tracking_number: TrackingNumber::from("AB12CD34"),
            provider: "Love Express".to_string(),
            destination: "Her Heart".to_string(),
            eta: now,
            status: TrackingStatus::InTransit,
            update_key: UpdateKey::from("abcdefgh12345678".to_string()),
            creator_locale: None,
            creator_timezone: Some("Europe/Paris".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn public_view_never_contains_the_key() {
        let links = Links::new("http://localhost:5173");
        let json = serde_json::to_string(&TrackingView::new(&tracking(), &links)).unwrap();

        assert!(!json.contains("abcdefgh12345678"));
        assert!(!json.contains("updateLink"));
        assert!(!json.contains("creatorLocale"));
        assert!(json.contains("\"creatorTimezone\":\"Europe/Paris\""));
        assert!(json.contains("\"status\":\"In Transit\""));
    }

    #[test]
    fn update_view_carries_key_only_in_link() {
        let links = Links::new("http://localhost:5173");
        let t = tracking();
        let view = TrackingView::new(&t, &links).with_update_link(&t, &links);
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(
            json["updateLink"],
            "http://localhost:5173/track/AB12CD34/update?key=abcdefgh12345678"
        );
        assert_eq!(json.to_string().matches("abcdefgh12345678").count(), 1);
    }

    #[test]
    fn status_request_rejects_unknown_labels() {
        assert!(serde_json::from_str::<StatusRequest>(r#"{"status":"Lost"}"#).is_err());
        let ok: StatusRequest = serde_json::from_str(r#"{"status":"Out for Delivery"}"#).unwrap();
        assert_eq!(ok.status, TrackingStatus::OutForDelivery);
    }
}
