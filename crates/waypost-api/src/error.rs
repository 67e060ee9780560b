//! HTTP error responses.
//!
//! Maps the coded `WaypostError` taxonomy onto status codes and the
//! `{"error": {"code", "message"}}` body. Server-side failures are logged
//! with full detail and answered with a generic message.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use waypost_core::{CoreError, WaypostError};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details including code and message
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Error code from the taxonomy (E1001-E3001)
    pub code: String,
    /// Human-readable error description
    pub message: String,
}

/// Handler error carrying a `WaypostError`.
#[derive(Debug)]
pub struct ApiError(pub WaypostError);

impl ApiError {
    /// Returns the HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            WaypostError::Validation { .. } => StatusCode::BAD_REQUEST,
            WaypostError::MissingUpdateKey => StatusCode::UNAUTHORIZED,
            WaypostError::InvalidUpdateKey => StatusCode::FORBIDDEN,
            WaypostError::TrackingNotFound { .. } => StatusCode::NOT_FOUND,
            WaypostError::DuplicateTrackingNumber { .. } => StatusCode::CONFLICT,
            WaypostError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<WaypostError> for ApiError {
    fn from(err: WaypostError) -> Self {
        Self(err)
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(WaypostError::Storage(err))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(WaypostError::validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if self.0.is_client_error() {
            self.0.to_string()
        } else {
            error!(code = self.0.code(), error = %self.0, "request failed");
            INTERNAL_ERROR_MESSAGE.to_string()
        };

        let body =
            ErrorResponse { error: ErrorDetail { code: self.0.code().to_string(), message } };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn statuses_follow_the_taxonomy() {
        let cases = [
            (WaypostError::validation("eta"), StatusCode::BAD_REQUEST),
            (WaypostError::MissingUpdateKey, StatusCode::UNAUTHORIZED),
            (WaypostError::InvalidUpdateKey, StatusCode::FORBIDDEN),
            (WaypostError::not_found("AB12CD34"), StatusCode::NOT_FOUND),
            (
                WaypostError::DuplicateTrackingNumber { tracking_number: "AB12CD34".into() },
                StatusCode::CONFLICT,
            ),
            (
                WaypostError::Storage(CoreError::Database("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError(err).status_code(), status);
        }
    }

    #[tokio::test]
    async fn client_errors_carry_code_and_message() {
        let response = ApiError(WaypostError::not_found("AB12CD34")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "E1004");
        assert_eq!(json["error"]["message"], "[E1004] Tracking not found: AB12CD34");
    }

    #[tokio::test]
    async fn server_errors_hide_detail() {
        let err = CoreError::Database("password authentication failed".into());
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "E3001");
        assert_eq!(json["error"]["message"], "Internal server error");
    }
}
