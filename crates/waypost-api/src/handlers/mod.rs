//! HTTP request handlers for the Waypost API.
//!
//! Handlers follow a consistent pattern:
//! - Authorization before body parsing on update routes
//! - Tracing spans carrying the tracking number
//! - Standardized error responses with codes (E1001-E3001)
//!
//! # Handler Organization
//!
//! - `tracking` - create, read and update endpoints
//! - `stream` - live server-sent event stream
//! - `health` - health, readiness and liveness probes

pub mod health;
pub mod stream;
pub mod tracking;

pub use health::{health_check, liveness_check, readiness_check};
pub use stream::tracking_events;
pub use tracking::{
    add_location, create_tracking, get_tracking, get_tracking_for_update, list_trackings,
    update_destination, update_eta, update_status,
};
