//! # Scrobd Daemon Library
//!
//! The delivery pipeline behind the `scrobd` binary: per-source polling
//! loops feed a stateful play detector, confirmed plays fan out into
//! per-client scrobble queues, and each client processor deduplicates
//! against that client's history before submitting.
//!
//! Vendor adapters plug in through the [`sources::SourceAdapter`] and
//! [`clients::ScrobbleClient`] traits; the daemon owns the loops, queues,
//! matching and retry policy.

pub mod clients;
pub mod config;
pub mod daemon;
pub mod error;
pub mod notify;
pub mod sources;
pub mod state;
pub mod transform;

pub use daemon::Daemon;
pub use error::{Error, Result};
pub use state::SharedState;
