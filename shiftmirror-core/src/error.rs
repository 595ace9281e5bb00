//! Error types for shiftmirror operations.

use thiserror::Error;

/// Errors that can occur while managing or reconciling a feed.
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),

    #[error("Feed request timed out after {0}s")]
    FetchTimeout(u64),

    #[error("Failed to fetch feed: {0}")]
    FetchFailed(String),

    #[error("ICS parse error: {0}")]
    ParseError(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MirrorError {
    /// Stable machine-readable name, stored on sync runs and returned to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            MirrorError::NotFound(_) => "not_found",
            MirrorError::InvalidUrl(_) => "invalid_url",
            MirrorError::FetchTimeout(_) => "fetch_timeout",
            MirrorError::FetchFailed(_) => "fetch_failed",
            MirrorError::ParseError(_) => "parse_error",
            MirrorError::Persistence(_) => "persistence_error",
            MirrorError::Validation(_) => "validation_error",
            MirrorError::Config(_) => "config_error",
            MirrorError::Io(_) => "io_error",
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::Persistence(err.to_string())
    }
}

/// Result type alias for shiftmirror operations.
pub type MirrorResult<T> = Result<T, MirrorError>;
