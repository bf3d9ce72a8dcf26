//! Error types for `ffbridge` core library.

use thiserror::Error;

/// Result type alias using `ffbridge` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `ffbridge` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
