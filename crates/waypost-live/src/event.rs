//! Push events delivered to tracking viewers.
//!
//! Each event carries a kind and a pre-serialized JSON payload, so a
//! broadcast serializes once no matter how many subscribers receive it.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use waypost_core::{LocationUpdate, TrackingNumber, TrackingStatus};

/// Kind of a push event, used as the SSE `event:` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PushEventKind {
    /// First event on every stream.
    Connected,
    /// Keep-alive beat with no state meaning.
    Heartbeat,
    /// A location was appended.
    LocationUpdate,
    /// The status changed.
    StatusChange,
    /// The ETA changed.
    EtaChange,
    /// The destination changed.
    DestinationChange,
    /// `Delivered` locations were removed after leaving `Delivered`.
    DeliveryRemoved,
}

impl PushEventKind {
    /// Returns the wire name of this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Heartbeat => "heartbeat",
            Self::LocationUpdate => "location-update",
            Self::StatusChange => "status-change",
            Self::EtaChange => "eta-change",
            Self::DestinationChange => "destination-change",
            Self::DeliveryRemoved => "delivery-removed",
        }
    }

    /// Whether this kind reflects a change to tracking state.
    pub const fn is_state_change(self) -> bool {
        !matches!(self, Self::Connected | Self::Heartbeat)
    }
}

impl fmt::Display for PushEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A push event with its serialized payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    kind: PushEventKind,
    data: Arc<str>,
}

impl PushEvent {
    fn new(kind: PushEventKind, data: serde_json::Value) -> Self {
        Self { kind, data: data.to_string().into() }
    }

    /// Greeting queued on every new subscription.
    pub fn connected(tracking_number: &TrackingNumber) -> Self {
        Self::new(PushEventKind::Connected, json!({ "trackingNumber": tracking_number }))
    }

    /// Keep-alive beat.
    pub fn heartbeat(timestamp: DateTime<Utc>) -> Self {
        Self::new(PushEventKind::Heartbeat, json!({ "timestamp": timestamp }))
    }

    /// A location update as stored.
    pub fn location_update(update: &LocationUpdate) -> Self {
        Self::new(
            PushEventKind::LocationUpdate,
            json!({
                "trackingNumber": update.tracking_number,
                "id": update.id,
                "location": update.location,
                "timestamp": update.recorded_at,
            }),
        )
    }

    /// A new status.
    pub fn status_change(
        tracking_number: &TrackingNumber,
        status: TrackingStatus,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            PushEventKind::StatusChange,
            json!({
                "trackingNumber": tracking_number,
                "status": status,
                "updatedAt": updated_at,
            }),
        )
    }

    /// A new ETA.
    pub fn eta_change(tracking_number: &TrackingNumber, eta: DateTime<Utc>) -> Self {
        Self::new(
            PushEventKind::EtaChange,
            json!({ "trackingNumber": tracking_number, "eta": eta }),
        )
    }

    /// A new destination.
    pub fn destination_change(tracking_number: &TrackingNumber, destination: &str) -> Self {
        Self::new(
            PushEventKind::DestinationChange,
            json!({ "trackingNumber": tracking_number, "destination": destination }),
        )
    }

    /// `Delivered` entries were removed from the history.
    pub fn delivery_removed(tracking_number: &TrackingNumber) -> Self {
        Self::new(PushEventKind::DeliveryRemoved, json!({ "trackingNumber": tracking_number }))
    }

    /// Returns the event kind.
    pub fn kind(&self) -> PushEventKind {
        self.kind
    }

    /// Returns the serialized JSON payload.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Parses the payload back into a JSON value.
    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.data)
    }

    /// Renders the event as a `text/event-stream` frame.
    pub fn to_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.kind, self.data)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use waypost_core::{LocationId, TrackingId};

    use super::*;

    #[test]
    fn kinds_use_kebab_case_wire_names() {
        assert_eq!(PushEventKind::LocationUpdate.as_str(), "location-update");
        assert_eq!(PushEventKind::DeliveryRemoved.to_string(), "delivery-removed");
        assert_eq!(
            serde_json::to_string(&PushEventKind::DestinationChange).unwrap(),
            "\"destination-change\""
        );
    }

    #[test]
    fn frame_layout() {
        let event = PushEvent::connected(&TrackingNumber::from("AB12CD34"));
        assert_eq!(
            event.to_frame(),
            "event: connected\ndata: {\"trackingNumber\":\"AB12CD34\"}\n\n"
        );
    }

    #[test]
    fn location_update_payload_is_camel_case() {
        let recorded_at = Utc.with_ymd_and_hms(2024, 2, 14, 18, 0, 0).unwrap();
        let update = LocationUpdate {
            id: LocationId::new(),
            tracking_id: TrackingId::new(),
            tracking_number: TrackingNumber::from("AB12CD34"),
            location: "Depot".to_string(),
            recorded_at,
        };

        let json = PushEvent::location_update(&update).json().unwrap();

        assert_eq!(json["trackingNumber"], "AB12CD34");
        assert_eq!(json["id"], update.id.to_string());
        assert_eq!(json["location"], "Depot");
        assert_eq!(json["timestamp"], "2024-02-14T18:00:00Z");
        assert!(json.get("trackingId").is_none());
    }

    #[test]
    fn status_change_uses_display_label() {
        let event = PushEvent::status_change(
            &TrackingNumber::from("AB12CD34"),
            TrackingStatus::OutForDelivery,
            Utc::now(),
        );
        assert_eq!(event.json().unwrap()["status"], "Out for Delivery");
        assert!(event.kind().is_state_change());
        assert!(!PushEventKind::Heartbeat.is_state_change());
    }
}
