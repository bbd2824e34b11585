//! Per-client scrobble processor
//!
//! One worker loop per client drains that client's queue in ascending
//! play-date order: refresh the history cache when it might be stale, skip
//! items outside the comparable time frame, ask the duplicate matcher,
//! submit, and route failures to the dead-letter store or a bounded
//! restart, depending on classification. The loop is the sole mutator of
//! every collection it owns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scrobd_common::events::{
    ClientStatus, Notification, NotifyPriority, PlaySummary, ScrobdEvent, SkipReason,
};
use scrobd_common::play::{
    DeadLetterScrobble, PlayRecord, QueuedScrobble, ScrobbledPlayObject,
};

use crate::clients::dead_letter::DeadLetterStore;
use crate::clients::matcher::{find_existing_scrobble, MatchResult};
use crate::clients::queue::{ScrobbleQueue, SubmittedCache};
use crate::clients::{ClientError, ClientSettings, ScrobbleClient};
use crate::sources::poller::sleep_cancellable;
use crate::state::SharedState;
use crate::transform::{TransformHook, TransformPipeline};

/// Restart delay after a fatal drain error is `attempt * this`, seconds
const RESTART_BACKOFF_SECS: f64 = 10.0;

/// Poll interval while waiting for a stop acknowledgement
const STOP_ACK_POLL: Duration = Duration::from_millis(250);

/// The client's recent history as last fetched, plus when
#[derive(Debug, Default)]
struct RecentCache {
    plays: Vec<PlayRecord>,
    refreshed_at: Option<DateTime<Utc>>,
}

/// Queue, caches, dead letters and the processor loop for one client
pub struct ClientWorker {
    name: String,
    settings: ClientSettings,
    adapter: Arc<dyn ScrobbleClient>,
    transforms: Arc<TransformPipeline>,
    state: Arc<SharedState>,
    queue: Mutex<ScrobbleQueue>,
    submitted: Mutex<SubmittedCache>,
    recent: Mutex<RecentCache>,
    dead_letters: Mutex<DeadLetterStore>,
    scrobbling: AtomicBool,
}

impl ClientWorker {
    pub fn new(
        settings: ClientSettings,
        adapter: Arc<dyn ScrobbleClient>,
        transforms: Arc<TransformPipeline>,
        state: Arc<SharedState>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: settings.name.clone(),
            settings,
            adapter,
            transforms,
            state,
            queue: Mutex::new(ScrobbleQueue::new()),
            submitted: Mutex::new(SubmittedCache::new()),
            recent: Mutex::new(RecentCache::default()),
            dead_letters: Mutex::new(DeadLetterStore::new()),
            scrobbling: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Hand a confirmed play to this client: apply the pre-compare
    /// transform, wrap it with a fresh id and insert in play-date order.
    pub async fn enqueue(&self, source: &str, play: PlayRecord) {
        let play = self.transforms.apply(TransformHook::PreCompare, &play);
        let item = QueuedScrobble::new(source, play);
        let summary = PlaySummary::from(&item.play);

        let depth = {
            let mut queue = self.queue.lock().await;
            queue.enqueue(item);
            queue.len()
        };

        self.state.bus().emit_lossy(ScrobdEvent::ScrobbleQueued {
            client: self.name.clone(),
            play: summary,
            queue_depth: depth,
            timestamp: Utc::now(),
        });
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Run the processor until cancelled, stopped, or permanently failed
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        self.state
            .set_client_status(&self.name, ClientStatus::Initializing)
            .await;

        if let Err(err) = self.initialize().await {
            warn!(client = %self.name, "initialization failed: {}", err);
            self.state
                .set_client_status(&self.name, ClientStatus::InitFailed)
                .await;
            self.state
                .notify(Notification::new(
                    format!("Client {} failed to initialize", self.name),
                    err.to_string(),
                    NotifyPriority::Error,
                ))
                .await;
            return;
        }

        self.state
            .set_client_status(&self.name, ClientStatus::Ready)
            .await;
        self.scrobbling.store(true, Ordering::SeqCst);

        let mut attempt: u32 = 0;
        loop {
            self.state
                .set_client_status(&self.name, ClientStatus::Scrobbling)
                .await;

            match self.drain(&cancel).await {
                Ok(()) => {
                    // Cooperative stop or cancellation
                    self.state
                        .set_client_status(&self.name, ClientStatus::Idle)
                        .await;
                    break;
                }
                Err(err) => {
                    attempt += 1;
                    if attempt > self.settings.max_processing_retries {
                        warn!(
                            client = %self.name,
                            attempts = attempt,
                            "giving up after repeated fatal errors: {}", err
                        );
                        self.state
                            .set_client_status(&self.name, ClientStatus::Errored)
                            .await;
                        self.state
                            .notify(Notification::new(
                                format!("Client {} stopped", self.name),
                                format!(
                                    "processor gave up after {} restarts: {}",
                                    attempt - 1,
                                    err
                                ),
                                NotifyPriority::Error,
                            ))
                            .await;
                        break;
                    }

                    let delay =
                        Duration::from_secs_f64(attempt as f64 * RESTART_BACKOFF_SECS);
                    warn!(
                        client = %self.name,
                        attempt,
                        "processor hit a fatal error, restarting in {:?}: {}", delay, err
                    );
                    if sleep_cancellable(&cancel, delay).await {
                        self.state
                            .set_client_status(&self.name, ClientStatus::Idle)
                            .await;
                        break;
                    }
                }
            }
        }

        self.scrobbling.store(false, Ordering::SeqCst);
    }

    async fn initialize(&self) -> Result<(), ClientError> {
        self.adapter.test_auth().await?;
        self.adapter.check_connection().await?;
        Ok(())
    }

    /// One drain pass. Returns Ok on cooperative stop/cancel and Err on a
    /// fatal (show stopper) submission failure, with the failed item
    /// already requeued at the front.
    async fn drain(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        let scrobble_delay = Duration::from_secs_f64(self.settings.scrobble_delay_secs);
        let scrobble_sleep = Duration::from_secs_f64(self.settings.scrobble_sleep_secs);
        let mut last_submit: Option<Instant> = None;

        loop {
            if cancel.is_cancelled() || !self.scrobbling.load(Ordering::SeqCst) {
                return Ok(());
            }

            let item = self.queue.lock().await.pop_front();
            let Some(item) = item else {
                if sleep_cancellable(cancel, scrobble_sleep).await {
                    return Ok(());
                }
                continue;
            };

            self.state.bus().emit_lossy(ScrobdEvent::ScrobbleDequeued {
                client: self.name.clone(),
                play: PlaySummary::from(&item.play),
                timestamp: Utc::now(),
            });

            self.refresh_history_if_stale(&item).await;

            if !self.time_frame_valid(&item.play).await {
                debug!(
                    client = %self.name,
                    play = %item.play,
                    "outside the client's visible history window, skipping"
                );
                self.emit_skip(&item.play, SkipReason::OutsideTimeFrame);
                continue;
            }

            let matched = self.check_duplicate(&item.play).await;
            if let Some(existing) = matched.matched {
                debug!(
                    client = %self.name,
                    play = %item.play,
                    existing = %existing,
                    exact = matched.exact,
                    "already scrobbled, skipping"
                );
                self.emit_skip(&item.play, SkipReason::Duplicate);
                continue;
            }

            // Respect the client's rate limit between submissions
            if let Some(prev) = last_submit {
                let elapsed = prev.elapsed();
                if elapsed < scrobble_delay {
                    tokio::time::sleep(scrobble_delay - elapsed).await;
                }
            }

            let outgoing = self.transforms.apply(TransformHook::PostCompare, &item.play);
            match self.adapter.submit(&outgoing).await {
                Ok(confirmed) => {
                    last_submit = Some(Instant::now());
                    info!(client = %self.name, play = %outgoing, "scrobbled");
                    self.record_submission(outgoing, confirmed).await;
                }
                Err(err) if err.is_show_stopper() => {
                    self.queue.lock().await.requeue_front(item);
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        client = %self.name,
                        play = %outgoing,
                        "submission rejected, moving to dead letter: {}", err
                    );
                    let summary = PlaySummary::from(&item.play);
                    let error = err.to_string();
                    self.dead_letters.lock().await.push(item, &error);
                    self.state.bus().emit_lossy(ScrobdEvent::DeadLetter {
                        client: self.name.clone(),
                        play: summary,
                        error,
                        timestamp: Utc::now(),
                    });
                }
            }
        }
    }

    /// Re-fetch the client's recent history when the cached view might
    /// miss this item: the item postdates the last refresh, or a newer
    /// scrobble than the last refresh is already known.
    async fn refresh_history_if_stale(&self, item: &QueuedScrobble) {
        let newest_known = self.submitted.lock().await.newest_scrobble_date();
        let needs_refresh = {
            let recent = self.recent.lock().await;
            match recent.refreshed_at {
                None => true,
                Some(at) => {
                    item.play.data.play_date > at
                        || newest_known.map(|n| n > at).unwrap_or(false)
                }
            }
        };
        if !needs_refresh || !self.settings.check_existing_scrobbles {
            return;
        }

        match self
            .adapter
            .get_recent_history(self.settings.recent_history_limit)
            .await
        {
            Ok(plays) => {
                let mut recent = self.recent.lock().await;
                recent.plays = plays;
                recent.refreshed_at = Some(Utc::now());
            }
            // Best effort: match against the stale view rather than stall
            Err(err) => {
                warn!(client = %self.name, "history refresh failed: {}", err)
            }
        }
    }

    /// A play older than the oldest play the client still reports cannot
    /// be compared against history and is skipped, not retried.
    async fn time_frame_valid(&self, play: &PlayRecord) -> bool {
        let recent = self.recent.lock().await;
        match recent.plays.iter().map(|p| p.data.play_date).min() {
            Some(oldest) => play.data.play_date >= oldest,
            None => true,
        }
    }

    async fn check_duplicate(&self, play: &PlayRecord) -> MatchResult {
        if !self.settings.check_existing_scrobbles {
            return MatchResult::default();
        }
        let mut submitted = self.submitted.lock().await;
        let recent = self.recent.lock().await;
        find_existing_scrobble(
            play,
            submitted.as_slice(),
            &recent.plays,
            &self.transforms,
            self.settings.granularity_secs,
        )
    }

    async fn record_submission(&self, play: PlayRecord, confirmed: PlayRecord) {
        let summary = PlaySummary::from(&play);
        self.submitted.lock().await.push(ScrobbledPlayObject {
            play,
            scrobble: confirmed,
        });
        self.state.bus().emit_lossy(ScrobdEvent::Scrobble {
            client: self.name.clone(),
            play: summary,
            timestamp: Utc::now(),
        });
    }

    fn emit_skip(&self, play: &PlayRecord, reason: SkipReason) {
        self.state.bus().emit_lossy(ScrobdEvent::ScrobbleSkipped {
            client: self.name.clone(),
            play: PlaySummary::from(play),
            reason,
            timestamp: Utc::now(),
        });
    }

    /// Dead-letter sweep, run from the daemon heartbeat: retry every item
    /// below the ceiling with the same validity/dedup/submit sequence.
    pub async fn process_dead_letters(&self) {
        let eligible = self
            .dead_letters
            .lock()
            .await
            .eligible(self.settings.dead_letter_retry_ceiling);
        if eligible.is_empty() {
            return;
        }
        debug!(
            client = %self.name,
            count = eligible.len(),
            "retrying dead-lettered scrobbles"
        );

        for dead in eligible {
            if !self.time_frame_valid(&dead.play).await {
                self.dead_letters.lock().await.remove(dead.id);
                self.emit_skip(&dead.play, SkipReason::OutsideTimeFrame);
                continue;
            }

            if self.check_duplicate(&dead.play).await.is_duplicate() {
                self.dead_letters.lock().await.remove(dead.id);
                self.emit_skip(&dead.play, SkipReason::Duplicate);
                continue;
            }

            let outgoing = self.transforms.apply(TransformHook::PostCompare, &dead.play);
            match self.adapter.submit(&outgoing).await {
                Ok(confirmed) => {
                    self.dead_letters.lock().await.remove(dead.id);
                    self.record_submission(outgoing, confirmed).await;
                    self.emit_dead_letter_retry(&dead, dead.retries, true);
                }
                Err(err) => {
                    let now = Utc::now();
                    let mut store = self.dead_letters.lock().await;
                    store.mark_failure(dead.id, err.to_string(), now);
                    drop(store);
                    self.emit_dead_letter_retry(&dead, dead.retries + 1, false);
                    if err.is_show_stopper() {
                        warn!(
                            client = %self.name,
                            "aborting dead-letter sweep: {}", err
                        );
                        break;
                    }
                }
            }
        }
    }

    fn emit_dead_letter_retry(&self, dead: &DeadLetterScrobble, retries: u32, success: bool) {
        self.state.bus().emit_lossy(ScrobdEvent::DeadLetterRetry {
            client: self.name.clone(),
            play: PlaySummary::from(&dead.play),
            retries,
            success,
            timestamp: Utc::now(),
        });
    }

    /// Dead letters currently parked, for operators
    pub async fn dead_letter_snapshot(&self) -> Vec<DeadLetterScrobble> {
        self.dead_letters.lock().await.snapshot()
    }

    /// Operator removal of one dead letter
    pub async fn remove_dead_letter(&self, id: uuid::Uuid) -> bool {
        self.dead_letters.lock().await.remove(id)
    }

    /// Operator removal of all dead letters
    pub async fn clear_dead_letters(&self) {
        self.dead_letters.lock().await.clear();
    }

    /// Ask the processor to stop; it observes the flag at its next
    /// suspension point
    pub fn request_stop(&self) {
        self.scrobbling.store(false, Ordering::SeqCst);
    }

    /// Request a stop and poll for acknowledgement. Returns false when the
    /// loop did not acknowledge within the timeout.
    pub async fn stop_and_wait(&self, timeout: Duration) -> bool {
        self.request_stop();
        let deadline = Instant::now() + timeout;
        loop {
            if self.state.client_status(&self.name).await != ClientStatus::Scrobbling {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(STOP_ACK_POLL).await;
        }
    }
}

impl std::fmt::Debug for ClientWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientWorker")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};

    struct MockClient {
        history: std::sync::Mutex<Vec<PlayRecord>>,
        submissions: std::sync::Mutex<Vec<(PlayRecord, Instant)>>,
        failures: std::sync::Mutex<VecDeque<ClientError>>,
        history_calls: AtomicUsize,
    }

    impl MockClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                history: std::sync::Mutex::new(Vec::new()),
                submissions: std::sync::Mutex::new(Vec::new()),
                failures: std::sync::Mutex::new(VecDeque::new()),
                history_calls: AtomicUsize::new(0),
            })
        }

        fn with_history(self: Arc<Self>, plays: Vec<PlayRecord>) -> Arc<Self> {
            *self.history.lock().unwrap() = plays;
            self
        }

        fn queue_failure(&self, err: ClientError) {
            self.failures.lock().unwrap().push_back(err);
        }

        fn submitted_tracks(&self) -> Vec<String> {
            self.submissions
                .lock()
                .unwrap()
                .iter()
                .map(|(p, _)| p.data.track.clone().unwrap_or_default())
                .collect()
        }

        fn submission_instants(&self) -> Vec<Instant> {
            self.submissions.lock().unwrap().iter().map(|(_, t)| *t).collect()
        }
    }

    #[async_trait]
    impl ScrobbleClient for MockClient {
        async fn get_recent_history(
            &self,
            _limit: usize,
        ) -> Result<Vec<PlayRecord>, ClientError> {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.history.lock().unwrap().clone())
        }

        async fn submit(&self, play: &PlayRecord) -> Result<PlayRecord, ClientError> {
            if let Some(err) = self.failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            self.submissions
                .lock()
                .unwrap()
                .push((play.clone(), Instant::now()));
            Ok(play.clone())
        }
    }

    fn play(track: &str, offset_secs: i64) -> PlayRecord {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        PlayRecord::new(
            "test-source",
            track,
            vec!["New Order".into()],
            base + ChronoDuration::seconds(offset_secs),
        )
    }

    fn worker(adapter: Arc<MockClient>, settings: ClientSettings) -> Arc<ClientWorker> {
        ClientWorker::new(
            settings,
            adapter,
            Arc::new(TransformPipeline::default()),
            Arc::new(SharedState::new(64)),
        )
    }

    fn fast_settings() -> ClientSettings {
        ClientSettings {
            scrobble_delay_secs: 0.0,
            scrobble_sleep_secs: 0.1,
            ..ClientSettings::named("mock")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_processed_in_play_date_order() {
        let client = MockClient::new();
        let w = worker(client.clone(), fast_settings());

        w.enqueue("test-source", play("third", 300)).await;
        w.enqueue("test-source", play("first", 0)).await;
        w.enqueue("test-source", play("second", 150)).await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(w.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(client.submitted_tracks(), vec!["first", "second", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_minimum_delay_between_submissions() {
        let client = MockClient::new();
        let settings = ClientSettings {
            scrobble_delay_secs: 2.0,
            scrobble_sleep_secs: 0.1,
            ..ClientSettings::named("mock")
        };
        let w = worker(client.clone(), settings);

        for (i, track) in ["a", "b", "c"].iter().enumerate() {
            w.enqueue("test-source", play(track, i as i64)).await;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(w.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(30)).await;
        cancel.cancel();
        handle.await.unwrap();

        let instants = client.submission_instants();
        assert_eq!(instants.len(), 3);
        for pair in instants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_submission_skipped() {
        let client = MockClient::new();
        let w = worker(client.clone(), fast_settings());
        let mut events = w.state.subscribe();

        w.enqueue("test-source", play("Crystal", 0)).await;
        // Same logical play again, two seconds later
        w.enqueue("test-source", play("Crystal", 2)).await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(w.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(client.submitted_tracks(), vec!["Crystal"]);
        let mut saw_duplicate_skip = false;
        while let Ok(event) = events.try_recv() {
            if let ScrobdEvent::ScrobbleSkipped {
                reason: SkipReason::Duplicate,
                ..
            } = event
            {
                saw_duplicate_skip = true;
            }
        }
        assert!(saw_duplicate_skip);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_fatal_failure_goes_to_dead_letter() {
        let client = MockClient::new();
        client.queue_failure(ClientError::Upstream {
            message: "ignored submission".into(),
            fatal: false,
        });
        let w = worker(client.clone(), fast_settings());

        w.enqueue("test-source", play("rejected", 0)).await;
        w.enqueue("test-source", play("accepted", 10)).await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(w.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        handle.await.unwrap();

        // The loop kept going past the failure
        assert_eq!(client.submitted_tracks(), vec!["accepted"]);
        let dead = w.dead_letter_snapshot().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].retries, 0);
        assert_eq!(dead[0].play.data.track.as_deref(), Some("rejected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_requeues_and_stops_after_retries() {
        let client = MockClient::new();
        // Enough fatal errors to exhaust every restart
        for _ in 0..10 {
            client.queue_failure(ClientError::Upstream {
                message: "auth revoked".into(),
                fatal: true,
            });
        }
        let settings = ClientSettings {
            max_processing_retries: 2,
            ..fast_settings()
        };
        let w = worker(client.clone(), settings);

        w.enqueue("test-source", play("stuck", 0)).await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(w.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(120)).await;
        handle.await.unwrap();

        assert_eq!(
            w.state.client_status("mock").await,
            ClientStatus::Errored
        );
        // The item survived every attempt in the queue
        assert_eq!(w.queue_depth().await, 1);
        assert!(client.submitted_tracks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_frame_invalid_item_skipped() {
        // The client only remembers plays from offset 100 on; an older
        // queued item is outside the comparable window
        let client = MockClient::new().with_history(vec![play("old history", 100)]);
        let w = worker(client.clone(), fast_settings());

        w.enqueue("test-source", play("too old", 0)).await;
        w.enqueue("test-source", play("fine", 200)).await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(w.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(client.submitted_tracks(), vec!["fine"]);
        // Skipped, not dead-lettered, not requeued
        assert!(w.dead_letter_snapshot().await.is_empty());
        assert_eq!(w.queue_depth().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_letter_retries_are_bounded() {
        let client = MockClient::new();
        let settings = ClientSettings {
            dead_letter_retry_ceiling: 3,
            ..fast_settings()
        };
        let w = worker(client.clone(), settings);

        // Park an item, then fail every sweep attempt
        let item = QueuedScrobble::new("test-source", play("cursed", 0));
        w.dead_letters.lock().await.push(item, "first failure");

        for _ in 0..3 {
            client.queue_failure(ClientError::Upstream {
                message: "still rejected".into(),
                fatal: false,
            });
            w.process_dead_letters().await;
        }

        // Ceiling reached: further sweeps do nothing, the item remains
        w.process_dead_letters().await;
        let dead = w.dead_letter_snapshot().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].retries, 3);
        assert!(client.submitted_tracks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_letter_retry_success_removes_item() {
        let client = MockClient::new();
        let w = worker(client.clone(), fast_settings());

        let item = QueuedScrobble::new("test-source", play("recovered", 0));
        w.dead_letters.lock().await.push(item, "first failure");

        w.process_dead_letters().await;
        assert!(w.dead_letter_snapshot().await.is_empty());
        assert_eq!(client.submitted_tracks(), vec!["recovered"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_handshake_acknowledged() {
        let client = MockClient::new();
        let w = worker(client.clone(), fast_settings());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(w.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            w.state.client_status("mock").await,
            ClientStatus::Scrobbling
        );

        assert!(w.stop_and_wait(Duration::from_secs(10)).await);
        assert_eq!(w.state.client_status("mock").await, ClientStatus::Idle);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_refreshed_before_first_item() {
        let client = MockClient::new();
        let w = worker(client.clone(), fast_settings());

        w.enqueue("test-source", play("a", 0)).await;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(w.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(client.history_calls.load(Ordering::SeqCst) >= 1);
    }
}
