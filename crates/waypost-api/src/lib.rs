//! Waypost HTTP API.
//!
//! Routes, handlers, the tracking service with its status transition policy,
//! configuration loading and the live event stream endpoint.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use waypost_core::{Clock, SelectedStore, TrackingStore};
use waypost_live::SubscriberRegistry;

pub mod config;
pub mod error;
pub mod handlers;
pub mod links;
pub mod middleware;
pub mod server;
pub mod service;

pub use config::Config;
pub use error::{ApiError, ErrorDetail, ErrorResponse};
pub use links::Links;
pub use server::{create_router, shutdown_signal, start_server};
pub use service::{CreateTracking, TrackingService};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Selected record store, also queried for backend status.
    pub store: Arc<SelectedStore>,
    /// Tracking operations and status transition policy.
    pub service: Arc<TrackingService>,
    /// Live subscribers per tracking number.
    pub registry: Arc<SubscriberRegistry>,
    /// Share and update link builder.
    pub links: Arc<Links>,
    /// Time source for health timestamps.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wires the service over the given store and registry.
    pub fn new(
        store: Arc<SelectedStore>,
        registry: Arc<SubscriberRegistry>,
        links: Links,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let service =
            TrackingService::new(store.clone() as Arc<dyn TrackingStore>, registry.clone());

        Self { store, service: Arc::new(service), registry, links: Arc::new(links), clock }
    }
}
