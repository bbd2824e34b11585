//! Operator notifications
//!
//! Notifiers are fire-and-forget: a failing notifier must never affect core
//! control flow, so implementations swallow their own errors and the daemon
//! dispatches without awaiting results it would act on.

use async_trait::async_trait;
use tracing::{error, info, warn};

use scrobd_common::events::{Notification, NotifyPriority};

/// Delivery transport for operator notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification; implementations log and swallow failures
    async fn notify(&self, notification: &Notification);
}

/// Notifier that writes through the tracing subscriber; always registered
/// so notifications are never lost entirely
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) {
        match notification.priority {
            NotifyPriority::Info => {
                info!(title = %notification.title, "{}", notification.message)
            }
            NotifyPriority::Warn => {
                warn!(title = %notification.title, "{}", notification.message)
            }
            NotifyPriority::Error => {
                error!(title = %notification.title, "{}", notification.message)
            }
        }
    }
}
