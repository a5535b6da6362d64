//! Error type for the streaming channel.

/// Fault on the per-execution event stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Transport-level connect or I/O failure; the connection manager retries
    /// these per its backoff policy.
    #[error("transport error: {0}")]
    Transport(String),

    /// Attempted to send while the channel is not connected. Non-fatal: live
    /// edit notifications are best-effort, the overlay remains the source of
    /// truth.
    #[error("not connected")]
    NotConnected,
}
