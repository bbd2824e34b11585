//! Client side of the pipeline
//!
//! A client is a tracking service that accepts scrobbles. Vendor adapters
//! implement [`ScrobbleClient`]; the daemon owns the queue, the duplicate
//! matcher, the processor loop and the dead-letter store sitting on top.

pub mod dead_letter;
pub mod matcher;
pub mod processor;
pub mod queue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use scrobd_common::play::PlayRecord;

pub use dead_letter::DeadLetterStore;
pub use matcher::{MatchResult, ScoreBreakdown};
pub use processor::ClientWorker;
pub use queue::{ScrobbleQueue, SubmittedCache};

/// Errors a client adapter can raise
#[derive(Error, Debug)]
pub enum ClientError {
    /// DNS/timeout/connection-reset class failures
    #[error("client connectivity error: {0}")]
    Connectivity(String),

    /// The remote service answered, but with an application error
    #[error("client upstream error: {message}")]
    Upstream {
        message: String,
        /// Fatal ("show stopper") errors mean the client is no longer
        /// usable: auth lost, permanent rejection. Non-fatal errors are a
        /// single rejected submission and route to the dead-letter store.
        fatal: bool,
    },
}

impl ClientError {
    /// Whether this failure stops the processor loop (to restart with
    /// backoff) rather than dead-lettering one item. Connectivity loss
    /// counts: retrying the next item immediately would fail the same way.
    pub fn is_show_stopper(&self) -> bool {
        match self {
            ClientError::Connectivity(_) => true,
            ClientError::Upstream { fatal, .. } => *fatal,
        }
    }
}

/// Capability set a vendor client implements
#[async_trait]
pub trait ScrobbleClient: Send + Sync {
    /// The service's own view of recent scrobbles, newest first or not;
    /// the matcher does not rely on order
    async fn get_recent_history(&self, limit: usize) -> Result<Vec<PlayRecord>, ClientError>;

    /// Submit one play; returns the play as confirmed by the service
    async fn submit(&self, play: &PlayRecord) -> Result<PlayRecord, ClientError>;

    /// Verify credentials are still good
    async fn test_auth(&self) -> Result<(), ClientError> {
        Ok(())
    }

    /// Verify the service is reachable
    async fn check_connection(&self) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Per-client delivery tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Client name; must be unique across the daemon
    #[serde(default)]
    pub name: String,

    /// Whether to consult the client's recent history before submitting
    #[serde(default = "default_true")]
    pub check_existing_scrobbles: bool,

    /// Minimum spacing between submissions, seconds
    #[serde(default = "default_scrobble_delay")]
    pub scrobble_delay_secs: f64,

    /// Sleep between empty-queue checks, seconds
    #[serde(default = "default_scrobble_sleep")]
    pub scrobble_sleep_secs: f64,

    /// Processor restarts after fatal errors before giving up
    #[serde(default = "default_max_processing_retries")]
    pub max_processing_retries: u32,

    /// Dead-letter retries per item before it is left for the operator
    #[serde(default = "default_dead_letter_ceiling")]
    pub dead_letter_retry_ceiling: u32,

    /// How much history to request from the client
    #[serde(default = "default_history_limit")]
    pub recent_history_limit: usize,

    /// Timestamp tolerance used when matching against this client's
    /// history, seconds
    #[serde(default = "default_granularity")]
    pub granularity_secs: f64,
}

fn default_true() -> bool {
    true
}
fn default_scrobble_delay() -> f64 {
    1.0
}
fn default_scrobble_sleep() -> f64 {
    10.0
}
fn default_max_processing_retries() -> u32 {
    5
}
fn default_dead_letter_ceiling() -> u32 {
    3
}
fn default_history_limit() -> usize {
    20
}
fn default_granularity() -> f64 {
    10.0
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            check_existing_scrobbles: true,
            scrobble_delay_secs: default_scrobble_delay(),
            scrobble_sleep_secs: default_scrobble_sleep(),
            max_processing_retries: default_max_processing_retries(),
            dead_letter_retry_ceiling: default_dead_letter_ceiling(),
            recent_history_limit: default_history_limit(),
            granularity_secs: default_granularity(),
        }
    }
}

impl ClientSettings {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}
