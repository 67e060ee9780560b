//! Error types and result handling for tracking operations.
//!
//! Defines the storage-level `CoreError` shared by both store backends and
//! the coded `WaypostError` taxonomy that request handlers map onto HTTP
//! status codes.

use thiserror::Error;

use crate::TrackingNumber;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for storage operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Reading or writing a store document failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A store document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A tracking with this number already exists.
    #[error("Duplicate tracking number: {0}")]
    DuplicateTrackingNumber(TrackingNumber),

    /// Constraint violation.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                Self::ConstraintViolation(format!("foreign key constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                Self::ConstraintViolation(format!("check constraint violation: {db_err}"))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

/// Waypost error types with stable codes for clients.
#[derive(Debug, Error)]
pub enum WaypostError {
    // Request errors (E1001-E1005)
    /// Request body or parameters failed validation (E1001).
    #[error("[E1001] Validation failed: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// No update key supplied for a protected operation (E1002).
    #[error("[E1002] Missing update key")]
    MissingUpdateKey,

    /// Supplied update key does not match the tracking (E1003).
    #[error("[E1003] Invalid update key")]
    InvalidUpdateKey,

    /// Tracking number unknown (E1004).
    #[error("[E1004] Tracking not found: {tracking_number}")]
    TrackingNotFound {
        /// The tracking number that was looked up
        tracking_number: String,
    },

    /// Could not allocate an unused tracking number (E1005).
    #[error("[E1005] Duplicate tracking number: {tracking_number}")]
    DuplicateTrackingNumber {
        /// The colliding tracking number
        tracking_number: TrackingNumber,
    },

    // System errors (E3001)
    /// Storage backend failure (E3001).
    #[error("[E3001] Storage error: {0}")]
    Storage(#[from] CoreError),
}

impl WaypostError {
    /// Creates a validation error with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Creates a not-found error for the given tracking number.
    pub fn not_found(tracking_number: impl ToString) -> Self {
        Self::TrackingNotFound { tracking_number: tracking_number.to_string() }
    }

    /// Returns the error code (E1001-E3001).
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "E1001",
            Self::MissingUpdateKey => "E1002",
            Self::InvalidUpdateKey => "E1003",
            Self::TrackingNotFound { .. } => "E1004",
            Self::DuplicateTrackingNumber { .. } => "E1005",
            Self::Storage(_) => "E3001",
        }
    }

    /// Returns whether the error originates from the caller's request rather
    /// than from the service.
    pub const fn is_client_error(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}
