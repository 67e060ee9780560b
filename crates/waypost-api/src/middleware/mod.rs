//! Request authorization for update operations.
//!
//! Update routes require the per-tracking update key, supplied as a `key`
//! query parameter or an `Authorization: Bearer` header.
pub mod auth;

pub use auth::AuthorizedTracking;
