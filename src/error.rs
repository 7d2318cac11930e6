//! Error types for authgate.

use thiserror::Error;

use crate::ratelimit::StoreError;

/// Main error type for authgate operations.
#[derive(Error, Debug)]
pub enum AuthgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid action policies
    #[error("Policy error: {0}")]
    Policy(String),

    /// Identifier hashing errors
    #[error("Identity error: {0}")]
    Identity(String),

    /// Bucket store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for authgate operations.
pub type Result<T> = std::result::Result<T, AuthgateError>;
