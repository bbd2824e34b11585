//! Common error types for scrobd

use thiserror::Error;

/// Common result type for scrobd operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared across the scrobd crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Structurally invalid play data; such plays are dropped, never retried
    #[error("Invalid play: {0}")]
    InvalidPlay(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
