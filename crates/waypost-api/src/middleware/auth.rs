//! Update key authorization extractor.
//!
//! Resolves the tracking number from the path, finds the caller's key and
//! checks it against the stored one before any request body is read.

use axum::{
    extract::{FromRequestParts, Path, Query},
    http::{request::Parts, HeaderMap},
};
use serde::Deserialize;
use waypost_core::{Tracking, TrackingNumber, WaypostError};

use crate::{error::ApiError, AppState};

#[derive(Debug, Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

/// Extracts a non-empty update key from the `key` query parameter.
fn extract_query_key(parts: &Parts) -> Option<String> {
    Query::<KeyQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.key)
        .filter(|key| !key.is_empty())
}

/// Extracts the update key from the Authorization header.
/// Supports Bearer token format: "Bearer <update-key>"
fn extract_bearer_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|key| !key.is_empty())
}

/// The caller's key, preferring the query parameter over the header.
fn extract_key(parts: &Parts) -> Option<String> {
    extract_query_key(parts).or_else(|| extract_bearer_key(&parts.headers))
}

/// A tracking whose update key the caller proved to hold.
#[derive(Debug, Clone)]
pub struct AuthorizedTracking(pub Tracking);

impl FromRequestParts<AppState> for AuthorizedTracking {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Path(tracking_number) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError(WaypostError::validation(e.body_text())))?;

        let key = extract_key(parts);
        let tracking = state
            .service
            .authorize(&TrackingNumber::from(tracking_number), key.as_deref())
            .await?;

        Ok(Self(tracking))
    }
}
