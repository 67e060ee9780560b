//! Test data builders and fixtures.
//!
//! Defaults describe the canonical Valentine's delivery used across the
//! test suites.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use waypost_core::{NewTracking, TrackingNumber, UpdateKey};

/// Default carrier label.
pub const DEFAULT_PROVIDER: &str = "Love Express";

/// Default destination label.
pub const DEFAULT_DESTINATION: &str = "Her Heart";

/// Default ETA as sent over the wire.
pub const DEFAULT_ETA: &str = "2024-02-14T18:00:00.000Z";

/// Default ETA as a timestamp.
pub fn default_eta() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 14, 18, 0, 0).single().unwrap_or_default()
}

/// Builder for store-level tracking input.
#[derive(Debug, Clone)]
pub struct TrackingBuilder {
    tracking_number: Option<TrackingNumber>,
    provider: String,
    destination: String,
    eta: DateTime<Utc>,
    update_key: Option<UpdateKey>,
    locale: Option<String>,
    timezone: Option<String>,
}

impl TrackingBuilder {
    /// Creates a builder with the default delivery.
    pub fn new() -> Self {
        Self {
            tracking_number: None,
            provider: DEFAULT_PROVIDER.to_string(),
            destination: DEFAULT_DESTINATION.to_string(),
            eta: default_eta(),
            update_key: None,
            locale: None,
            timezone: None,
        }
    }

    /// Pins the tracking number instead of generating one.
    #[must_use]
    pub fn tracking_number(mut self, number: impl Into<TrackingNumber>) -> Self {
        self.tracking_number = Some(number.into());
        self
    }

    /// Sets the carrier label.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Sets the destination label.
    #[must_use]
    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    /// Sets the ETA.
    #[must_use]
    pub fn eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = eta;
        self
    }

    /// Pins the update key instead of generating one.
    #[must_use]
    pub fn update_key(mut self, key: impl Into<String>) -> Self {
        self.update_key = Some(UpdateKey::from(key.into()));
        self
    }

    /// Sets the creator locale and timezone hints.
    #[must_use]
    pub fn creator(mut self, locale: impl Into<String>, timezone: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self.timezone = Some(timezone.into());
        self
    }

    /// Builds the store input.
    pub fn build(self) -> NewTracking {
        let mut new = NewTracking::new(self.provider, self.destination, self.eta)
            .with_locale(self.locale)
            .with_timezone(self.timezone);
        if let Some(number) = self.tracking_number {
            new.tracking_number = number;
        }
        if let Some(key) = self.update_key {
            new.update_key = key;
        }
        new
    }
}

impl Default for TrackingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Request body for `POST /api/tracking` with the default delivery.
pub fn create_request_body() -> Value {
    json!({
        "provider": DEFAULT_PROVIDER,
        "destination": DEFAULT_DESTINATION,
        "eta": DEFAULT_ETA,
    })
}

/// Request body for `POST /api/tracking` with creator hints.
pub fn create_request_body_with_creator(locale: &str, timezone: &str) -> Value {
    json!({
        "provider": DEFAULT_PROVIDER,
        "destination": DEFAULT_DESTINATION,
        "eta": DEFAULT_ETA,
        "locale": locale,
        "timezone": timezone,
    })
}
