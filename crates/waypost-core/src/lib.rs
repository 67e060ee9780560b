//! Core domain models, storage backends, and error handling.
//!
//! Provides strongly-typed tracking primitives, the `TrackingStore` contract
//! with its flat-file and PostgreSQL implementations, and the startup
//! selector that binds one of them. Every other Waypost crate builds on
//! these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result, WaypostError};
pub use models::{
    LocationId, LocationUpdate, NewTracking, Tracking, TrackingId, TrackingNumber, TrackingStatus,
    TrackingWithLocations, UpdateKey, DELIVERED_LOCATION,
};
pub use storage::{
    FileStore, PostgresStore, SelectedStore, StoreBackend, StoreOptions, StoreStatus, TrackingStore,
};
pub use time::{Clock, RealClock, TestClock};
