//! Error types for baseline fitting, scoring and model storage.

use thiserror::Error;

/// Result type alias for baseline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types surfaced to callers of the anomaly service
#[derive(Debug, Error)]
pub enum Error {
    /// Empty, ragged or non-finite training matrix, or an unusable query
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Query length or update column count differs from the stored model
    #[error("Dimension mismatch: expected {expected} dimensions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Run is absent or the caller has no access to it.
    ///
    /// Both causes share this variant and message so that a caller cannot
    /// probe for runs owned by other tenants.
    #[error("Unauthorized or model not found")]
    NotFound,

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Backend(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Stable error category, independent of the message text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    DimensionMismatch,
    NotFound,
    Backend,
    Config,
}

impl Error {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Error::NotFound => ErrorKind::NotFound,
            Error::Backend(_) => ErrorKind::Backend,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// HTTP status a transport layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidInput(_) | Error::DimensionMismatch { .. } => 400,
            Error::NotFound => 404,
            Error::Backend(_) => 503,
            Error::Config(_) => 500,
        }
    }

    /// Whether retrying the same request later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Backend(e) if e.is_transient())
    }
}

/// Model storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or refused the connection
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Backend call did not complete within the configured timeout
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Concurrent writers kept winning the race for the same run
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Backend rejected or failed a read/write
    #[error("Backend error: {0}")]
    Backend(String),

    /// Record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StoreError {
    /// Configuration mistakes are permanent; everything else may clear up.
    pub fn is_transient(&self) -> bool {
        !matches!(self, StoreError::Configuration(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StoreError::Backend(format!("request timed out: {}", err))
        } else if err.is_connect() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}
