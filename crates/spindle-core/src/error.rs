//! Error types for spindle-core.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for spindle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the worker bridge.
#[derive(Debug, Error)]
pub enum Error {
    /// The worker process could not be started or the handshake failed.
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    /// A payload was malformed, of an unsupported type, or failed to
    /// round-trip through the codec.
    #[error("codec error: {0}")]
    Codec(String),

    /// The peer is gone or the byte stream broke mid-conversation.
    #[error("channel error: {0}")]
    Channel(String),

    /// A blocking receive exceeded its deadline. The channel is left
    /// consistent; no partial frame is consumed.
    #[error("receive timed out after {0:?}")]
    Timeout(Duration),

    /// A second consumer tried to pull from a worker stream that is
    /// already being consumed.
    #[error("worker stream is already being consumed")]
    ConcurrentAccess,

    /// The task running inside the worker failed. The payload travelled
    /// over the wire as a stream-error message.
    #[error("task failed in worker: {0}")]
    Remote(RemoteError),
}

/// A failure produced by the task body inside the worker process.
///
/// Crosses the process boundary as the payload of a stream-error message,
/// then surfaces to the caller as [`Error::Remote`] at the failing pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Human-readable description of what went wrong in the worker.
    pub message: String,
}

impl RemoteError {
    /// Create a remote error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}
