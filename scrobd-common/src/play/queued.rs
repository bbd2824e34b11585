//! Delivery-side wrappers around a play
//!
//! A confirmed play becomes a [`QueuedScrobble`] when handed to a client
//! queue, a [`DeadLetterScrobble`] when delivery fails non-fatally, and a
//! [`ScrobbledPlayObject`] once the client confirms it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PlayRecord;

/// A play waiting in one client's queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedScrobble {
    /// Process-assigned id for this in-flight item
    pub id: Uuid,
    /// Identifier of the source the play came from
    pub source: String,
    pub play: PlayRecord,
}

impl QueuedScrobble {
    pub fn new(source: impl Into<String>, mut play: PlayRecord) -> Self {
        let id = Uuid::new_v4();
        play.meta.play_id = Some(id);
        Self {
            id,
            source: source.into(),
            play,
        }
    }
}

/// A play that failed non-fatal delivery and awaits bounded retry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterScrobble {
    pub id: Uuid,
    pub source: String,
    pub play: PlayRecord,
    /// Retry attempts performed so far
    pub retries: u32,
    /// Last delivery error, for operators
    pub error: String,
    pub last_retry: Option<DateTime<Utc>>,
}

impl DeadLetterScrobble {
    /// Wrap a failed queue item, keeping its id so operators can correlate
    pub fn from_queued(item: QueuedScrobble, error: impl Into<String>) -> Self {
        Self {
            id: item.id,
            source: item.source,
            play: item.play,
            retries: 0,
            error: error.into(),
            last_retry: None,
        }
    }
}

/// A successful submission: what we sent and what the client confirmed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrobbledPlayObject {
    /// The play as submitted
    pub play: PlayRecord,
    /// The play as echoed/confirmed by the client
    pub scrobble: PlayRecord,
}
