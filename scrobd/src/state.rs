//! Shared daemon state
//!
//! Holds the event bus, the per-component status registries and the
//! registered notifiers. Workers receive an `Arc<SharedState>` instead of
//! reaching for process-wide singletons.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;

use scrobd_common::events::{
    ClientStatus, EventBus, Notification, ScrobdEvent, SourceStatus,
};

use crate::notify::Notifier;

/// Point-in-time view of every component's status
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub sources: BTreeMap<String, SourceStatus>,
    pub clients: BTreeMap<String, ClientStatus>,
}

/// State shared by all workers of one daemon
pub struct SharedState {
    bus: EventBus,
    source_status: RwLock<BTreeMap<String, SourceStatus>>,
    client_status: RwLock<BTreeMap<String, ClientStatus>>,
    notifiers: RwLock<Vec<Arc<dyn Notifier>>>,
}

impl SharedState {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            bus: EventBus::new(event_capacity),
            source_status: RwLock::new(BTreeMap::new()),
            client_status: RwLock::new(BTreeMap::new()),
            notifiers: RwLock::new(Vec::new()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribe to the daemon's event stream
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ScrobdEvent> {
        self.bus.subscribe()
    }

    pub async fn add_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.notifiers.write().await.push(notifier);
    }

    /// Fan a notification out to every registered notifier. Fire and
    /// forget: delivery runs detached and failures stay inside the
    /// notifier implementations.
    pub async fn notify(&self, notification: Notification) {
        self.bus.emit_lossy(ScrobdEvent::Notified {
            title: notification.title.clone(),
            message: notification.message.clone(),
            priority: notification.priority,
            timestamp: Utc::now(),
        });

        let notifiers = self.notifiers.read().await.clone();
        for notifier in notifiers {
            let notification = notification.clone();
            tokio::spawn(async move {
                notifier.notify(&notification).await;
            });
        }
    }

    /// Record a source status, emitting an event when it actually changed
    pub async fn set_source_status(&self, name: &str, status: SourceStatus) {
        let mut map = self.source_status.write().await;
        let old = map.insert(name.to_string(), status);
        let old = old.unwrap_or(SourceStatus::Idle);
        if old != status {
            self.bus.emit_lossy(ScrobdEvent::SourceStatusChanged {
                source: name.to_string(),
                old_status: old,
                new_status: status,
                timestamp: Utc::now(),
            });
        }
    }

    pub async fn source_status(&self, name: &str) -> SourceStatus {
        self.source_status
            .read()
            .await
            .get(name)
            .copied()
            .unwrap_or(SourceStatus::Idle)
    }

    /// Record a client status, emitting an event when it actually changed
    pub async fn set_client_status(&self, name: &str, status: ClientStatus) {
        let mut map = self.client_status.write().await;
        let old = map.insert(name.to_string(), status);
        let old = old.unwrap_or(ClientStatus::NotInitialized);
        if old != status {
            self.bus.emit_lossy(ScrobdEvent::ClientStatusChanged {
                client: name.to_string(),
                old_status: old,
                new_status: status,
                timestamp: Utc::now(),
            });
        }
    }

    pub async fn client_status(&self, name: &str) -> ClientStatus {
        self.client_status
            .read()
            .await
            .get(name)
            .copied()
            .unwrap_or(ClientStatus::NotInitialized)
    }

    /// Per-source/per-client readiness for operators
    pub async fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            sources: self.source_status.read().await.clone(),
            clients: self.client_status.read().await.clone(),
        }
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState").field("bus", &self.bus).finish()
    }
}
