//! Error types for the Floodgate subsystem.

use thiserror::Error;

/// Main error type for Floodgate operations.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Configuration-related errors, raised at construction time only
    #[error("Configuration error: {0}")]
    Config(String),

    /// Quota store errors from the distributed backend
    #[error("Quota store error: {0}")]
    Store(#[from] redis::RedisError),

    /// The quota store did not answer within the configured bound
    #[error("Quota store timed out after {0}ms")]
    StoreTimeout(u64),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
