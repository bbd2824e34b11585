//! Per-source polling loop
//!
//! One worker per source fetches on an adaptive schedule: the base interval
//! while the source is active, growing toward `max_interval` during
//! inactivity, snapping back on new plays. Fetch errors retry a bounded
//! number of times before the loop stops and notifies.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use scrobd_common::events::{
    Notification, NotifyPriority, PlaySummary, ScrobdEvent, SourceStatus,
};
use scrobd_common::play::PlayRecord;

use crate::clients::ClientWorker;
use crate::sources::detector::PlayDetector;
use crate::sources::{SourceAdapter, SourceBatch, SourceError, SourceSettings};
use crate::state::SharedState;

/// A play this close to "now" waits before handoff, seconds
const NEAR_NOW_WINDOW_SECS: i64 = 5;

/// How long the handoff waits, giving slower sibling sources a chance to
/// report the same listen first
const NEAR_NOW_DELAY: Duration = Duration::from_secs(10);

/// Idle sleep growth per cycle once `check_active_for` has elapsed
const BACKOFF_FACTOR: f64 = 1.5;

/// Sleep with cancellation; returns true when the token fired first
pub(crate) async fn sleep_cancellable(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

/// Polling loop and detector state for one source
pub struct SourceWorker {
    name: String,
    settings: SourceSettings,
    adapter: Arc<dyn SourceAdapter>,
    state: Arc<SharedState>,
    clients: Vec<Arc<ClientWorker>>,
    detector: Mutex<PlayDetector>,
    last_seen: Mutex<Option<DateTime<Utc>>>,
}

impl SourceWorker {
    pub fn new(
        settings: SourceSettings,
        adapter: Arc<dyn SourceAdapter>,
        clients: Vec<Arc<ClientWorker>>,
        state: Arc<SharedState>,
    ) -> Arc<Self> {
        let name = settings.name.clone();
        Arc::new(Self {
            detector: Mutex::new(PlayDetector::new(&name)),
            name,
            settings,
            adapter,
            state,
            clients,
            last_seen: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    /// Run the polling loop until cancelled or failed beyond retry
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let base = Duration::from_secs(self.settings.interval_secs.max(1));
        let max = Duration::from_secs(
            self.settings.max_interval_secs.max(self.settings.interval_secs),
        );
        let check_active_for = Duration::from_secs(self.settings.check_active_for_secs);

        self.state
            .set_source_status(&self.name, SourceStatus::Polling)
            .await;
        info!(source = %self.name, interval = ?base, "polling started");

        let mut sleep_for = base;
        let mut last_activity = Instant::now();
        let mut retries: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.adapter.fetch_recent(self.settings.fetch_limit).await {
                Ok(batch) => {
                    retries = 0;
                    let new_plays = self.ingest(batch).await;

                    if !new_plays.is_empty() {
                        let now = Utc::now();
                        let near_now = new_plays.iter().any(|p| {
                            (now - p.data.play_date).num_seconds().abs() <= NEAR_NOW_WINDOW_SECS
                        });
                        if near_now {
                            debug!(
                                source = %self.name,
                                "fresh listen, delaying handoff to damp cross-source races"
                            );
                            if sleep_cancellable(&cancel, NEAR_NOW_DELAY).await {
                                break;
                            }
                        }

                        for play in &new_plays {
                            debug!(source = %self.name, play = %play, "discovered play");
                            self.state.bus().emit_lossy(ScrobdEvent::SourceDiscovered {
                                source: self.name.clone(),
                                play: PlaySummary::from(play),
                                timestamp: Utc::now(),
                            });
                            for client in &self.clients {
                                client.enqueue(&self.name, play.clone()).await;
                            }
                        }

                        sleep_for = base;
                        last_activity = Instant::now();
                    } else if last_activity.elapsed() >= check_active_for {
                        let grown = Duration::from_secs_f64(
                            sleep_for.as_secs_f64() * BACKOFF_FACTOR,
                        );
                        sleep_for = grown.min(max);
                    }

                    // A little jitter keeps sibling sources from polling in
                    // lockstep
                    let jitter =
                        Duration::from_millis(rand::thread_rng().gen_range(0..500));
                    if sleep_cancellable(&cancel, sleep_for + jitter).await {
                        break;
                    }
                }
                Err(err) if err.is_fatal() => {
                    error!(source = %self.name, "fatal upstream error: {}", err);
                    self.state
                        .set_source_status(&self.name, SourceStatus::Errored)
                        .await;
                    self.state
                        .notify(Notification::new(
                            format!("Source {} stopped", self.name),
                            err.to_string(),
                            NotifyPriority::Error,
                        ))
                        .await;
                    return;
                }
                Err(err) => {
                    retries += 1;
                    if retries > self.settings.max_poll_retries {
                        error!(
                            source = %self.name,
                            retries,
                            "polling failed beyond retry limit: {}", err
                        );
                        self.state
                            .set_source_status(&self.name, SourceStatus::Errored)
                            .await;
                        self.state
                            .notify(Notification::new(
                                format!("Source {} stopped", self.name),
                                format!("polling failed after {} retries: {}", retries - 1, err),
                                NotifyPriority::Error,
                            ))
                            .await;
                        return;
                    }

                    let delay = Duration::from_secs_f64(
                        retries as f64 * self.settings.retry_multiplier_secs,
                    );
                    warn!(
                        source = %self.name,
                        attempt = retries,
                        "fetch failed, retrying in {:?}: {}", delay, err
                    );
                    self.state
                        .set_source_status(&self.name, SourceStatus::Retrying)
                        .await;
                    if sleep_cancellable(&cancel, delay).await {
                        break;
                    }
                    self.state
                        .set_source_status(&self.name, SourceStatus::Polling)
                        .await;
                }
            }
        }

        self.state
            .set_source_status(&self.name, SourceStatus::Stopped)
            .await;
        info!(source = %self.name, "polling stopped");
    }

    /// Turn one fetch result into the plays not yet handed off.
    ///
    /// History batches are already discrete; player-state batches go
    /// through the stateful detector. The very first successful fetch
    /// replays backlog with `new_from_source = false`; delivery-side dedup
    /// makes the replay safe.
    async fn ingest(&self, batch: SourceBatch) -> Vec<PlayRecord> {
        let mut plays = match batch {
            SourceBatch::History(plays) => plays
                .into_iter()
                .filter_map(|p| match p.validate() {
                    Ok(()) => Some(p),
                    Err(err) => {
                        warn!(source = %self.name, "dropping malformed play: {}", err);
                        None
                    }
                })
                .collect::<Vec<_>>(),
            SourceBatch::PlayerState(states) => self
                .detector
                .lock()
                .await
                .process_player_states(&states, Utc::now()),
        };
        plays.sort_by_key(|p| p.data.play_date);

        let mut last_seen = self.last_seen.lock().await;
        let first_fetch = last_seen.is_none();
        let cutoff = *last_seen;

        let new_plays: Vec<PlayRecord> = plays
            .into_iter()
            .filter(|p| cutoff.map_or(true, |c| p.data.play_date > c))
            .map(|mut p| {
                p.meta.new_from_source = !first_fetch;
                p
            })
            .collect();

        if let Some(newest) = new_plays.iter().map(|p| p.data.play_date).max() {
            *last_seen = Some(cutoff.map_or(newest, |c| c.max(newest)));
        }
        new_plays
    }
}

impl std::fmt::Debug for SourceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceWorker")
            .field("name", &self.name)
            .finish()
    }
}
