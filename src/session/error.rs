//! Error type for session-level operations.

use crate::api::ApiError;
use crate::snapshot::SnapshotError;
use crate::stream::StreamError;

/// Fault surfaced by the execution session.
///
/// Every variant is recoverable: the session keeps whatever state it already
/// holds and records the message for the operator-facing view.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no execution bound")]
    NoExecution,

    #[error("replay is unavailable while the execution is running")]
    ReplayUnavailable,

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}
