//! Source side of the pipeline
//!
//! A source is anything that can report listens: a media server, a
//! streaming API, a webhook bridge. Vendor adapters implement
//! [`SourceAdapter`]; the daemon owns the polling loop and the stateful
//! play detector that sit on top of it.

pub mod detector;
pub mod poller;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use scrobd_common::play::{PlayRecord, PlayerStateData};

pub use detector::PlayDetector;
pub use poller::SourceWorker;

/// Errors a source adapter can raise, split along the retry boundary
#[derive(Error, Debug)]
pub enum SourceError {
    /// DNS/timeout/connection-reset class failures; always retryable,
    /// never an auth problem
    #[error("source connectivity error: {0}")]
    Connectivity(String),

    /// The remote service answered, but with an application error
    #[error("source upstream error: {message}")]
    Upstream {
        message: String,
        /// Fatal errors (auth revoked, quota permanently exceeded) stop
        /// the polling loop instead of retrying
        fatal: bool,
    },
}

impl SourceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Upstream { fatal: true, .. })
    }
}

/// What one fetch produced: discrete history, or continuous player state
/// that still needs the detector
#[derive(Debug, Clone)]
pub enum SourceBatch {
    History(Vec<PlayRecord>),
    PlayerState(Vec<PlayerStateData>),
}

/// Capability set a vendor source implements
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch recently played items, newest last is not required; the
    /// poller sorts by play date
    async fn fetch_recent(&self, limit: usize) -> Result<SourceBatch, SourceError>;

    /// Fetch the currently playing track, when the source can answer
    async fn fetch_now_playing(&self) -> Result<Option<PlayRecord>, SourceError> {
        Ok(None)
    }

    /// Verify credentials are still good
    async fn test_auth(&self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Verify the service is reachable
    async fn check_connection(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Per-source polling tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Source name; must be unique across the daemon
    #[serde(default)]
    pub name: String,

    /// Base sleep between polls, seconds
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Upper bound for the backed-off sleep, seconds
    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,

    /// How long without new activity before the sleep starts growing,
    /// seconds
    #[serde(default = "default_check_active_for")]
    pub check_active_for_secs: u64,

    /// Fetch retries before the loop gives up
    #[serde(default = "default_max_poll_retries")]
    pub max_poll_retries: u32,

    /// Retry delay is `attempt * retry_multiplier_secs`
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier_secs: f64,

    /// Timestamp reporting tolerance of this source, seconds; drives the
    /// temporal buckets in duplicate matching
    #[serde(default = "default_granularity")]
    pub granularity_secs: f64,

    /// How many items to ask for per fetch
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
}

fn default_interval() -> u64 {
    30
}
fn default_max_interval() -> u64 {
    300
}
fn default_check_active_for() -> u64 {
    300
}
fn default_max_poll_retries() -> u32 {
    1
}
fn default_retry_multiplier() -> f64 {
    1.5
}
fn default_granularity() -> f64 {
    10.0
}
fn default_fetch_limit() -> usize {
    20
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            interval_secs: default_interval(),
            max_interval_secs: default_max_interval(),
            check_active_for_secs: default_check_active_for(),
            max_poll_retries: default_max_poll_retries(),
            retry_multiplier_secs: default_retry_multiplier(),
            granularity_secs: default_granularity(),
            fetch_limit: default_fetch_limit(),
        }
    }
}

impl SourceSettings {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}
