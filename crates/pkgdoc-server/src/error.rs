//! Error types for the HTTP server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pkgdoc_resolve::ResolveError;
use pkgdoc_storage::StorageError;
use serde_json::json;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ServerError {
    /// Malformed version or implausible path.
    #[error("{message}")]
    BadRequest {
        /// Human-readable message.
        message: String,
        /// Search page suggested in place of the request.
        search_link: String,
    },

    /// Well-formed but unknown; a fetch may have been scheduled.
    #[error("{path} not found")]
    NotFound {
        /// Requested path.
        path: String,
        /// Whether a background fetch is pending or running for it.
        fetch_scheduled: bool,
    },

    /// Administratively excluded path.
    #[error("{0} not found")]
    Excluded(String),

    /// A background fetch settled on a permanent failure.
    #[error("{path} could not be processed: {reason}")]
    FailedToProcess {
        /// Requested path.
        path: String,
        /// Last fetch error.
        reason: String,
    },

    /// Storage lookup failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<ResolveError> for ServerError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Storage(e) => Self::Storage(e),
            other => Self::BadRequest {
                message: other.to_string(),
                search_link: other.search_link().unwrap_or("/search").to_owned(),
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::BadRequest {
                message,
                search_link,
            } => (
                StatusCode::BAD_REQUEST,
                json!({"error": message, "searchLink": search_link}),
            ),
            Self::NotFound {
                path,
                fetch_scheduled,
            } => (
                StatusCode::NOT_FOUND,
                json!({"error": self.to_string(), "path": path, "fetchScheduled": fetch_scheduled}),
            ),
            Self::Excluded(path) => (
                StatusCode::NOT_FOUND,
                json!({"error": self.to_string(), "path": path, "fetchScheduled": false}),
            ),
            Self::FailedToProcess { path, reason } => (
                StatusCode::NOT_FOUND,
                json!({"error": "failed to process", "path": path, "reason": reason}),
            ),
            Self::Storage(e) => {
                tracing::error!(error = %e, "Storage lookup failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": e.to_string()}),
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}
