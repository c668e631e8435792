//! Error types for Tollgate.

use thiserror::Error;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// The counter backend could not be reached or did not answer in time
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    /// A period is malformed or not part of the window policy
    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    /// No identity could be resolved for a request
    #[error("Identity error: {0}")]
    Identity(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TollgateError {
    fn from(err: config::ConfigError) -> Self {
        TollgateError::Config(err.to_string())
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
