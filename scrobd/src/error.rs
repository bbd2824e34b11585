//! Error types for the scrobd daemon
//!
//! The enum mirrors the pipeline's error taxonomy: connectivity problems
//! and upstream application errors come in through the adapter error types,
//! structural problems with play data are `Validation` (dropped, never
//! retried), and everything else is ambient.

use thiserror::Error;

use crate::clients::ClientError;
use crate::sources::SourceError;

/// Main error type for the scrobd daemon
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed play data; the item is dropped, never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Error raised by a source adapter
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Error raised by a client adapter
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<scrobd_common::Error> for Error {
    fn from(err: scrobd_common::Error) -> Self {
        match err {
            scrobd_common::Error::Io(e) => Error::Io(e),
            scrobd_common::Error::Config(msg) => Error::Config(msg),
            scrobd_common::Error::InvalidPlay(msg) => Error::Validation(msg),
            scrobd_common::Error::Internal(msg) => Error::Internal(msg),
        }
    }
}

/// Convenience Result type using the scrobd Error
pub type Result<T> = std::result::Result<T, Error>;
