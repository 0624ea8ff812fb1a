//! Error types for patchbay-core.

use thiserror::Error;

/// Error type for player and engine operations.
///
/// Most protocol-level failures are logged and dropped at the boundary
/// rather than surfaced here; see the per-module docs for which calls
/// return a `Result` and which degrade silently.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport lost: no message from server")]
    TransportLost,

    #[error("Failed to load patch: {0}")]
    Load(String),

    #[error("Malformed message: {0}")]
    Protocol(String),

    #[error("Unknown endpoint: {0}")]
    EndpointNotFound(String),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Virtual file read failed: {0}")]
    FileRead(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
