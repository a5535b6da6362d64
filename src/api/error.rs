//! Error type for REST API operations.

use serde::Deserialize;

/// Error from the REST collaborator.
///
/// API faults are never retried automatically; callers surface them to the
/// operator as a session-level error string.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request never completed (connect failure, timeout, DNS).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server answered with a non-2xx status.
    #[error("{status}: {message}")]
    Status {
        status: reqwest::StatusCode,
        message: String,
    },

    /// Body was 2xx but did not decode as the expected type.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Error body shape used by the backend: `{"error": "..."}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
}
