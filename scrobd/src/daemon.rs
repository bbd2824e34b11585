//! Daemon wiring
//!
//! Owns the shared state, the registered sources and clients, and the
//! background tasks: one polling loop per source, one processor per client,
//! the dead-letter heartbeat, and a bridge that mirrors events into the
//! log. Adapters register before `start`; shutdown is cooperative through
//! a cancellation token plus the per-client stop handshake.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scrobd_common::events::ScrobdEvent;

use crate::clients::{ClientSettings, ClientWorker, ScrobbleClient};
use crate::config::DaemonConfig;
use crate::notify::{LogNotifier, Notifier};
use crate::sources::{SourceAdapter, SourceSettings, SourceWorker};
use crate::state::SharedState;
use crate::transform::TransformPipeline;
use crate::{Error, Result};

/// How long `shutdown` waits for each client's stop acknowledgement
const STOP_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// The assembled daemon: registries plus running tasks
pub struct Daemon {
    state: Arc<SharedState>,
    transforms: Arc<TransformPipeline>,
    sources: Vec<Arc<SourceWorker>>,
    clients: Vec<Arc<ClientWorker>>,
    cancel: CancellationToken,
    dead_letter_interval: Duration,
    tasks: Vec<JoinHandle<()>>,
    started: bool,
}

impl Daemon {
    /// Build a daemon from configuration. Registers the log notifier so
    /// notifications always land somewhere.
    pub fn new(config: &DaemonConfig) -> Result<Self> {
        config.validate()?;
        let state = Arc::new(SharedState::new(config.daemon.event_capacity));
        let transforms = Arc::new(TransformPipeline::from_config(&config.transforms)?);

        Ok(Self {
            state,
            transforms,
            sources: Vec::new(),
            clients: Vec::new(),
            cancel: CancellationToken::new(),
            dead_letter_interval: Duration::from_secs(
                config.daemon.dead_letter_interval_secs.max(1),
            ),
            tasks: Vec::new(),
            started: false,
        })
    }

    pub fn state(&self) -> Arc<SharedState> {
        self.state.clone()
    }

    pub fn clients(&self) -> &[Arc<ClientWorker>] {
        &self.clients
    }

    pub fn sources(&self) -> &[Arc<SourceWorker>] {
        &self.sources
    }

    /// Register an additional notification transport
    pub async fn add_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.state.add_notifier(notifier).await;
    }

    /// Register a scrobble client; returns the worker so sources can be
    /// pointed at it
    pub fn register_client(
        &mut self,
        adapter: Arc<dyn ScrobbleClient>,
        settings: ClientSettings,
    ) -> Result<Arc<ClientWorker>> {
        if settings.name.trim().is_empty() {
            return Err(Error::Config("client with empty name".into()));
        }
        if self.clients.iter().any(|c| c.name() == settings.name) {
            return Err(Error::Config(format!(
                "duplicate client name '{}'",
                settings.name
            )));
        }
        let worker = ClientWorker::new(
            settings,
            adapter,
            self.transforms.clone(),
            self.state.clone(),
        );
        self.clients.push(worker.clone());
        Ok(worker)
    }

    /// Register a source feeding the given clients
    pub fn register_source(
        &mut self,
        adapter: Arc<dyn SourceAdapter>,
        settings: SourceSettings,
        clients: Vec<Arc<ClientWorker>>,
    ) -> Result<Arc<SourceWorker>> {
        if settings.name.trim().is_empty() {
            return Err(Error::Config("source with empty name".into()));
        }
        if self.sources.iter().any(|s| s.name() == settings.name) {
            return Err(Error::Config(format!(
                "duplicate source name '{}'",
                settings.name
            )));
        }
        let worker = SourceWorker::new(settings, adapter, clients, self.state.clone());
        self.sources.push(worker.clone());
        Ok(worker)
    }

    /// Spawn every worker plus the heartbeat and the event-to-log bridge
    pub async fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        self.state.add_notifier(Arc::new(LogNotifier)).await;

        self.tasks
            .push(tokio::spawn(event_log_bridge(self.state.subscribe())));

        for client in &self.clients {
            self.tasks
                .push(tokio::spawn(client.clone().run(self.cancel.clone())));
        }
        for source in &self.sources {
            self.tasks
                .push(tokio::spawn(source.clone().run(self.cancel.clone())));
        }

        self.tasks.push(tokio::spawn(dead_letter_heartbeat(
            self.clients.clone(),
            self.dead_letter_interval,
            self.cancel.clone(),
        )));

        info!(
            sources = self.sources.len(),
            clients = self.clients.len(),
            "daemon started"
        );
    }

    /// Trigger one dead-letter sweep outside the heartbeat schedule
    pub async fn process_dead_letters(&self) {
        for client in &self.clients {
            client.process_dead_letters().await;
        }
    }

    /// Cooperative shutdown: stop every client with the acknowledgement
    /// handshake, cancel every loop, then join the tasks.
    pub async fn shutdown(&mut self) {
        info!("daemon shutting down");
        for client in &self.clients {
            if !client.stop_and_wait(STOP_ACK_TIMEOUT).await {
                warn!(
                    client = %client.name(),
                    "processor did not acknowledge stop in time"
                );
            }
        }
        self.cancel.cancel();
        futures::future::join_all(self.tasks.drain(..)).await;
        info!("daemon stopped");
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("sources", &self.sources.len())
            .field("clients", &self.clients.len())
            .field("started", &self.started)
            .finish()
    }
}

/// Periodically retry dead-lettered scrobbles on every client
async fn dead_letter_heartbeat(
    clients: Vec<Arc<ClientWorker>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                for client in &clients {
                    client.process_dead_letters().await;
                }
            }
        }
    }
}

/// Mirror the event stream into the log so the pipeline is observable
/// without any other subscriber
async fn event_log_bridge(mut rx: broadcast::Receiver<ScrobdEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match &event {
                ScrobdEvent::SourceStatusChanged {
                    source,
                    old_status,
                    new_status,
                    ..
                } => {
                    info!(%source, "source status {} -> {}", old_status, new_status);
                }
                ScrobdEvent::ClientStatusChanged {
                    client,
                    old_status,
                    new_status,
                    ..
                } => {
                    info!(%client, "client status {} -> {}", old_status, new_status);
                }
                other => {
                    let payload = serde_json::to_string(other).unwrap_or_default();
                    debug!(event = other.event_type(), "{}", payload);
                }
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("event log bridge lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
