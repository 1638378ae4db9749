//! Error types for snapd API operations.

use thiserror::Error;

/// Errors that can occur talking to the snapd API.
#[derive(Debug, Error)]
pub enum Error {
    /// The snap is not installed on this machine (404 from `/v2/snaps`).
    #[error("snap not installed: {0}")]
    NotInstalled(String),

    /// The snap does not exist in the store (404 or empty `/v2/find` result).
    #[error("snap not found: {0}")]
    NotFound(String),

    /// snapd answered with an unexpected HTTP status code.
    #[error("unexpected HTTP status code: {0}")]
    Status(u16),

    /// The response could not be parsed as HTTP.
    #[error("malformed snapd response: {0}")]
    Protocol(String),

    /// The response body could not be decoded.
    #[error("failed to decode snapd response: {0}")]
    Json(#[from] serde_json::Error),

    /// The unix socket could not be reached.
    #[error("snapd socket error: {0}")]
    Socket(#[from] std::io::Error),
}

impl Error {
    /// Terminal errors are definitive store answers and must not be
    /// retried; everything else (socket, protocol, bad status) is
    /// transient from the caller's point of view.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NotInstalled(_) | Self::NotFound(_))
    }
}

/// Result type for snapd operations.
pub type Result<T> = std::result::Result<T, Error>;
