//! Error types for margin-core

use thiserror::Error;

/// Result type alias using margin-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in margin-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local store error (quota, corruption, locked file)
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found in the local store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authoritative backend call failed
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Engine configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error came from the local store rather than the backend.
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_))
    }
}

/// Failure reported by the authoritative backend.
///
/// The split between `Transient` and `Rejected` drives the retry policy of the
/// sync queue: transient failures consume one retry, rejections exhaust the
/// remaining budget.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Backend unreachable, timed out, or failed on its side (5xx, 408, 429)
    #[error("backend unavailable: {0}")]
    Transient(String),

    /// Backend refused the request (validation error, conflict, auth)
    #[error("backend rejected request: {0}")]
    Rejected(String),

    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend returned a payload the client could not interpret
    #[error("invalid backend payload: {0}")]
    InvalidPayload(String),
}

impl BackendError {
    /// Whether the failure should be retried on a later drain.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Rejected(_) | Self::InvalidPayload(_) => false,
            Self::Http(error) => {
                error.is_timeout()
                    || error.is_connect()
                    || error.is_request()
                    || error
                        .status()
                        .map_or(true, |status| status.is_server_error())
            }
        }
    }
}
