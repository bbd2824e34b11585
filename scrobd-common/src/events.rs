//! Event types and EventBus for the scrobd event system
//!
//! Events exist for observability (operators, UIs, log bridges); nothing in
//! the core pipeline consumes them, so emission is always non-blocking and
//! may be lossy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::play::PlayRecord;

/// Lifecycle of a source polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceStatus {
    Idle,
    Polling,
    Retrying,
    Stopped,
    Errored,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceStatus::Idle => "Idle",
            SourceStatus::Polling => "Polling",
            SourceStatus::Retrying => "Retrying",
            SourceStatus::Stopped => "Stopped",
            SourceStatus::Errored => "Errored",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a client scrobble processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientStatus {
    NotInitialized,
    Initializing,
    InitFailed,
    Ready,
    Scrobbling,
    Idle,
    Errored,
}

impl std::fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClientStatus::NotInitialized => "NotInitialized",
            ClientStatus::Initializing => "Initializing",
            ClientStatus::InitFailed => "InitFailed",
            ClientStatus::Ready => "Ready",
            ClientStatus::Scrobbling => "Scrobbling",
            ClientStatus::Idle => "Idle",
            ClientStatus::Errored => "Errored",
        };
        f.write_str(s)
    }
}

/// Why a queued play was skipped instead of submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The duplicate matcher found the play in the client's history
    Duplicate,
    /// The play is older than anything the client still reports
    OutsideTimeFrame,
}

/// Notification urgency, mapped to transport-specific priorities by
/// notifier implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyPriority {
    Info,
    Warn,
    Error,
}

/// An operator-facing notification, fire-and-forget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub priority: NotifyPriority,
}

impl Notification {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        priority: NotifyPriority,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            priority,
        }
    }
}

/// Compact play description carried inside events instead of the full record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaySummary {
    pub source: String,
    pub artists: Vec<String>,
    pub track: Option<String>,
    pub album: Option<String>,
    pub play_date: DateTime<Utc>,
}

impl From<&PlayRecord> for PlaySummary {
    fn from(play: &PlayRecord) -> Self {
        Self {
            source: play.meta.source.clone(),
            artists: play.data.artists.clone(),
            track: play.data.track.clone(),
            album: play.data.album.clone(),
            play_date: play.data.play_date,
        }
    }
}

/// Scrobd event types
///
/// Events are broadcast via [`EventBus`] and serialize with a `type` tag so
/// external consumers can filter without deserializing payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScrobdEvent {
    /// A source handed a newly confirmed play to delivery
    SourceDiscovered {
        source: String,
        play: PlaySummary,
        timestamp: DateTime<Utc>,
    },

    /// A play entered a client's queue
    ScrobbleQueued {
        client: String,
        play: PlaySummary,
        /// Queue depth after the insert
        queue_depth: usize,
        timestamp: DateTime<Utc>,
    },

    /// A play left a client's queue for processing
    ScrobbleDequeued {
        client: String,
        play: PlaySummary,
        timestamp: DateTime<Utc>,
    },

    /// A play was delivered and confirmed by the client
    Scrobble {
        client: String,
        play: PlaySummary,
        timestamp: DateTime<Utc>,
    },

    /// A play was dropped without submission
    ScrobbleSkipped {
        client: String,
        play: PlaySummary,
        reason: SkipReason,
        timestamp: DateTime<Utc>,
    },

    /// A play failed non-fatal delivery and moved to the dead-letter store
    DeadLetter {
        client: String,
        play: PlaySummary,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A dead-letter sweep retried a play
    DeadLetterRetry {
        client: String,
        play: PlaySummary,
        /// Retry count after this attempt
        retries: u32,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// A source polling loop changed status
    SourceStatusChanged {
        source: String,
        old_status: SourceStatus,
        new_status: SourceStatus,
        timestamp: DateTime<Utc>,
    },

    /// A client processor changed status
    ClientStatusChanged {
        client: String,
        old_status: ClientStatus,
        new_status: ClientStatus,
        timestamp: DateTime<Utc>,
    },

    /// An operator notification was dispatched
    Notified {
        title: String,
        message: String,
        priority: NotifyPriority,
        timestamp: DateTime<Utc>,
    },
}

impl ScrobdEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            ScrobdEvent::SourceDiscovered { .. } => "SourceDiscovered",
            ScrobdEvent::ScrobbleQueued { .. } => "ScrobbleQueued",
            ScrobdEvent::ScrobbleDequeued { .. } => "ScrobbleDequeued",
            ScrobdEvent::Scrobble { .. } => "Scrobble",
            ScrobdEvent::ScrobbleSkipped { .. } => "ScrobbleSkipped",
            ScrobdEvent::DeadLetter { .. } => "DeadLetter",
            ScrobdEvent::DeadLetterRetry { .. } => "DeadLetterRetry",
            ScrobdEvent::SourceStatusChanged { .. } => "SourceStatusChanged",
            ScrobdEvent::ClientStatusChanged { .. } => "ClientStatusChanged",
            ScrobdEvent::Notified { .. } => "Notified",
        }
    }
}

/// Central event distribution bus
///
/// Backed by `tokio::broadcast`: non-blocking publish, multiple concurrent
/// subscribers, automatic cleanup when subscribers drop. Slow subscribers
/// lag and lose old events rather than stalling producers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScrobdEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ScrobdEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` means nobody is listening
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ScrobdEvent,
    ) -> Result<usize, broadcast::error::SendError<ScrobdEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening
    pub fn emit_lossy(&self, event: ScrobdEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
