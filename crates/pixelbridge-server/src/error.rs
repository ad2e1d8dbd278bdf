//! Server error types.

use thiserror::Error;

/// Errors raised by the downstream side.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Asset or layout source failure.
    #[error("Asset error: {0}")]
    Asset(String),

    /// The bridge runtime is no longer running.
    #[error("Bridge stopped")]
    BridgeStopped,

    /// The observer could not queue its attach snapshot.
    #[error("Observer queue too small for snapshot")]
    SnapshotRejected,
}
