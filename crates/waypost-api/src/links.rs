//! Share and update link construction.

use waypost_core::{TrackingNumber, UpdateKey};

/// Builds frontend links for a tracking.
///
/// The update key only ever leaves the service inside an update link.
#[derive(Debug, Clone)]
pub struct Links {
    frontend_url: String,
}

impl Links {
    /// Creates a builder for the given frontend base URL.
    pub fn new(frontend_url: impl Into<String>) -> Self {
        let frontend_url = frontend_url.into();
        Self { frontend_url: frontend_url.trim().trim_end_matches('/').to_string() }
    }

    /// Public read-only link.
    pub fn share_link(&self, tracking_number: &TrackingNumber) -> String {
        format!("{}/track/{}", self.frontend_url, tracking_number)
    }

    /// Private link carrying the update key.
    pub fn update_link(&self, tracking_number: &TrackingNumber, key: &UpdateKey) -> String {
        format!("{}/track/{}/update?key={}", self.frontend_url, tracking_number, key.expose())
    }
}
