//! Per-client scrobble queue and submitted-play cache
//!
//! Both collections are owned exclusively by one client's processor loop;
//! they are plain data structures, the processor wraps them in its own
//! locks.

use std::collections::VecDeque;

use scrobd_common::play::{QueuedScrobble, ScrobbledPlayObject};

/// Successful submissions remembered per client; oldest evicted. Only
/// recent submissions matter for the exact-match dedup path.
pub const SUBMITTED_CACHE_CAP: usize = 40;

/// Queue of plays awaiting delivery to one client, kept in ascending
/// play-date order regardless of arrival order. Duplicate detection is
/// order-sensitive: a late-arriving but earlier-played item must be
/// compared against correctly-ordered history.
#[derive(Debug, Default)]
pub struct ScrobbleQueue {
    items: Vec<QueuedScrobble>,
}

impl ScrobbleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert and re-sort by play date; supports out-of-order, multi-source
    /// enqueue
    pub fn enqueue(&mut self, item: QueuedScrobble) {
        self.items.push(item);
        self.items.sort_by_key(|i| i.play.data.play_date);
    }

    /// Put a failed item back at the head without re-sorting; used when a
    /// fatal submit error requeues the in-flight item
    pub fn requeue_front(&mut self, item: QueuedScrobble) {
        self.items.insert(0, item);
    }

    /// Remove and return the oldest queued play
    pub fn pop_front(&mut self) -> Option<QueuedScrobble> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0))
        }
    }

    /// Play date of the newest queued item
    pub fn newest_play_date(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.items.iter().map(|i| i.play.data.play_date).max()
    }
}

/// Bounded memory of what was successfully submitted to one client
#[derive(Debug, Default)]
pub struct SubmittedCache {
    items: VecDeque<ScrobbledPlayObject>,
}

impl SubmittedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, item: ScrobbledPlayObject) {
        self.items.push_back(item);
        while self.items.len() > SUBMITTED_CACHE_CAP {
            self.items.pop_front();
        }
    }

    pub fn as_slice(&mut self) -> &[ScrobbledPlayObject] {
        self.items.make_contiguous();
        self.items.as_slices().0
    }

    /// Newest confirmed scrobble timestamp we know of, for staleness checks
    pub fn newest_scrobble_date(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.items.iter().map(|i| i.scrobble.data.play_date).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use scrobd_common::play::PlayRecord;

    fn queued(track: &str, offset_secs: i64) -> QueuedScrobble {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        QueuedScrobble::new(
            "test",
            PlayRecord::new(
                "test",
                track,
                vec!["New Order".into()],
                base + Duration::seconds(offset_secs),
            ),
        )
    }

    #[test]
    fn test_queue_orders_by_play_date() {
        let mut q = ScrobbleQueue::new();
        q.enqueue(queued("third", 300));
        q.enqueue(queued("first", 0));
        q.enqueue(queued("second", 150));

        let order: Vec<String> = std::iter::from_fn(|| q.pop_front())
            .map(|i| i.play.data.track.unwrap())
            .collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_requeue_front_preserves_position() {
        let mut q = ScrobbleQueue::new();
        q.enqueue(queued("a", 0));
        q.enqueue(queued("b", 10));

        let popped = q.pop_front().unwrap();
        q.requeue_front(popped);
        assert_eq!(q.len(), 2);
        assert_eq!(
            q.pop_front().unwrap().play.data.track.as_deref(),
            Some("a")
        );
    }

    #[test]
    fn test_submitted_cache_evicts_oldest() {
        let mut cache = SubmittedCache::new();
        for i in 0..(SUBMITTED_CACHE_CAP + 5) {
            let play = queued(&format!("t{}", i), i as i64).play;
            cache.push(ScrobbledPlayObject {
                play: play.clone(),
                scrobble: play,
            });
        }
        assert_eq!(cache.len(), SUBMITTED_CACHE_CAP);
        assert_eq!(
            cache.as_slice()[0].play.data.track.as_deref(),
            Some("t5")
        );
    }
}
