//! HTTP error responses in the Weave convention.
//!
//! Sync 1.5 clients expect failure bodies to be a bare JSON number
//! string: `"8"` for a rejected record, `"0"` for everything unnamed.
//! Storage errors keep their detail in the log only; the response body
//! stays generic.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::storage::StorageError;

/// Weave error token for unclassified errors (and unknown routes).
pub const WEAVE_UNKNOWN_ERROR: &str = "0";
/// Weave error token for a rejected record.
pub const WEAVE_INVALID_WBO: &str = "8";
/// Weave error token for a user over quota. Quota is reported but not
/// enforced, so this is never returned today.
pub const WEAVE_OVER_QUOTA: &str = "14";

/// Result alias for HTTP handlers.
pub type AppResult<T> = Result<T, AppError>;

/// An error response: a status code, optionally with a Weave token body.
#[derive(Debug, Clone)]
pub struct AppError {
    status: StatusCode,
    weave: Option<&'static str>,
}

impl AppError {
    /// An error carrying only a status code.
    pub fn with_status(status: StatusCode) -> AppError {
        Self {
            status,
            weave: None,
        }
    }

    /// An error carrying a Weave token as its JSON body.
    pub fn weave(status: StatusCode, token: &'static str) -> AppError {
        Self {
            status,
            weave: Some(token),
        }
    }

    /// The Weave flavoured 404: JSON body `"0"`.
    pub fn not_found() -> AppError {
        Self::weave(StatusCode::NOT_FOUND, WEAVE_UNKNOWN_ERROR)
    }

    /// A rejected record: body `"8"`.
    pub fn invalid_wbo(status: StatusCode) -> AppError {
        Self::weave(status, WEAVE_INVALID_WBO)
    }

    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.weave {
            Some(token) => (
                self.status,
                [(header::CONTENT_TYPE, "application/json")],
                token,
            )
                .into_response(),
            // 304 responses must have no body at all
            None if self.status == StatusCode::NOT_MODIFIED => self.status.into_response(),
            None => (
                self.status,
                self.status.canonical_reason().unwrap_or_default(),
            )
                .into_response(),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => AppError::not_found(),
            StorageError::InvalidBsoId
            | StorageError::InvalidSortIndex
            | StorageError::PayloadTooLarge
            | StorageError::InvalidTtl => AppError::invalid_wbo(StatusCode::BAD_REQUEST),
            StorageError::PoolClosed => AppError::with_status(StatusCode::SERVICE_UNAVAILABLE),
            StorageError::Database(_) | StorageError::Io(_) => {
                error!(%err, "storage failure");
                AppError::with_status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}
