use thiserror::Error;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error("invalid trusted subnet: {0}")]
    InvalidSubnet(String),
}

/// Errors raised by storage backends.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The short code is already taken by a record for a different URL.
    #[error("short code already exists: {0}")]
    Conflict(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage operation failed: {0}")]
    Operation(String),
    #[error("operation not supported by this backend: {0}")]
    Unsupported(String),
}

/// Errors visible to callers of the shortener service.
///
/// Backend failures are collapsed into [`ShortenerError::StorageUnavailable`];
/// raw driver or I/O errors never cross this boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShortenerError {
    #[error("short code not found: {0}")]
    NotFound(String),
    #[error("short code has been deleted: {0}")]
    Gone(String),
    #[error("url already shortened as: {0}")]
    Conflict(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("invalid input: {0}")]
    Validation(String),
}

impl From<CoreError> for ShortenerError {
    fn from(value: CoreError) -> Self {
        Self::Validation(value.to_string())
    }
}
