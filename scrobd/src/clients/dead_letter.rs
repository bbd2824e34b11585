//! Dead-letter storage for failed deliveries
//!
//! A play that failed with a non-fatal upstream error parks here and is
//! retried by the daemon's heartbeat sweep until it succeeds or reaches the
//! retry ceiling. Items at the ceiling stay visible until an operator
//! removes them; nothing is silently dropped.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use scrobd_common::play::{DeadLetterScrobble, QueuedScrobble};

/// Dead letters for one client; owned by that client's processor
#[derive(Debug, Default)]
pub struct DeadLetterStore {
    items: Vec<DeadLetterScrobble>,
}

impl DeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Park a failed queue item with a retry count of zero
    pub fn push(&mut self, item: QueuedScrobble, error: impl Into<String>) -> Uuid {
        let dead = DeadLetterScrobble::from_queued(item, error);
        let id = dead.id;
        self.items.push(dead);
        id
    }

    /// Items still below the retry ceiling, cloned so the sweep can run
    /// without holding the store locked across submissions
    pub fn eligible(&self, ceiling: u32) -> Vec<DeadLetterScrobble> {
        self.items
            .iter()
            .filter(|d| d.retries < ceiling)
            .cloned()
            .collect()
    }

    /// Record a failed retry attempt
    pub fn mark_failure(&mut self, id: Uuid, error: impl Into<String>, now: DateTime<Utc>) {
        if let Some(item) = self.items.iter_mut().find(|d| d.id == id) {
            item.retries += 1;
            item.error = error.into();
            item.last_retry = Some(now);
        }
    }

    /// Remove one item (successful retry or operator action)
    pub fn remove(&mut self, id: Uuid) -> bool {
        let before = self.items.len();
        self.items.retain(|d| d.id != id);
        self.items.len() != before
    }

    /// Operator action: drop everything
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Snapshot for status/inspection
    pub fn snapshot(&self) -> Vec<DeadLetterScrobble> {
        self.items.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use scrobd_common::play::PlayRecord;

    fn item() -> QueuedScrobble {
        QueuedScrobble::new(
            "test",
            PlayRecord::new(
                "test",
                "Crystal",
                vec!["New Order".into()],
                Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            ),
        )
    }

    #[test]
    fn test_push_starts_at_zero_retries() {
        let mut store = DeadLetterStore::new();
        store.push(item(), "rejected");
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].retries, 0);
        assert_eq!(snapshot[0].error, "rejected");
        assert!(snapshot[0].last_retry.is_none());
    }

    #[test]
    fn test_ceiling_excludes_exhausted_items() {
        let mut store = DeadLetterStore::new();
        let id = store.push(item(), "rejected");
        let now = Utc::now();

        for attempt in 0..3 {
            assert_eq!(store.eligible(3).len(), 1, "attempt {}", attempt);
            store.mark_failure(id, "still rejected", now);
        }

        // Ceiling reached: no longer eligible, but never dropped
        assert!(store.eligible(3).is_empty());
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot()[0].retries, 3);
        assert_eq!(store.snapshot()[0].last_retry, Some(now));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut store = DeadLetterStore::new();
        let id = store.push(item(), "a");
        store.push(item(), "b");

        assert!(store.remove(id));
        assert!(!store.remove(id));
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());
    }
}
