//! Stateful play detection
//!
//! Polling-based sources report the same track on every poll while it is
//! playing. The detector watches these snapshots and emits a play only
//! after it has persisted through the confirmation window, with a gap check
//! so a back-to-back replay of the same track is counted once per playback.
//!
//! Known limitation: a track shorter than the poll interval may never
//! accrue enough candidacy time and is silently missed.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use scrobd_common::play::{PlayRecord, PlayerStateData, PlayerStatus};

/// Seconds a play must remain observed before it counts
pub const CONFIRM_WINDOW_SECS: i64 = 30;

/// Confirmed plays kept for the replay gap check; oldest evicted
const CONFIRMED_CAP: usize = 40;

/// A play being watched for confirmation
#[derive(Debug, Clone)]
struct Candidate {
    play: PlayRecord,
    first_seen: DateTime<Utc>,
}

/// Per-source detector state. Owned exclusively by one source's polling
/// loop; never shared across sources.
#[derive(Debug)]
pub struct PlayDetector {
    source: String,
    candidates: Vec<Candidate>,
    confirmed: VecDeque<PlayRecord>,
}

impl PlayDetector {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            candidates: Vec::new(),
            confirmed: VecDeque::new(),
        }
    }

    /// Feed a snapshot of player states; only surfaces that are actually
    /// playing contribute an observed play.
    pub fn process_player_states(
        &mut self,
        states: &[PlayerStateData],
        now: DateTime<Utc>,
    ) -> Vec<PlayRecord> {
        let observed = states
            .iter()
            .filter(|s| s.status == PlayerStatus::Playing)
            .map(|s| s.play.clone())
            .collect();
        self.process_recent_plays(observed, now)
    }

    /// Feed a snapshot of currently-observed plays; returns the plays newly
    /// confirmed by this invocation (empty on most polls).
    pub fn process_recent_plays(
        &mut self,
        observed: Vec<PlayRecord>,
        now: DateTime<Utc>,
    ) -> Vec<PlayRecord> {
        // Lock every observed play to the observation time: the source can
        // only say "this is playing now", not when it started.
        let locked: Vec<PlayRecord> = observed
            .into_iter()
            .filter_map(|mut play| {
                play.data.play_date = now;
                match play.validate() {
                    Ok(()) => Some(play),
                    Err(err) => {
                        warn!(source = %self.source, "dropping malformed play: {}", err);
                        None
                    }
                }
            })
            .collect();

        if self.candidates.is_empty() {
            self.candidates = locked
                .iter()
                .map(|play| Candidate {
                    play: play.clone(),
                    first_seen: now,
                })
                .collect();
        } else {
            // A candidate no longer observed stopped playing before it
            // could be confirmed.
            self.candidates
                .retain(|c| locked.iter().any(|p| p.is_same_listen(&c.play)));
            for play in &locked {
                if !self.candidates.iter().any(|c| c.play.is_same_listen(play)) {
                    self.candidates.push(Candidate {
                        play: play.clone(),
                        first_seen: now,
                    });
                }
            }
        }

        self.candidates.sort_by_key(|c| c.play.data.play_date);

        let eligible: Vec<PlayRecord> = self
            .candidates
            .iter()
            .filter(|c| (now - c.first_seen).num_seconds() >= CONFIRM_WINDOW_SECS)
            .map(|c| c.play.clone())
            .collect();

        let mut newly_confirmed = Vec::new();
        for play in eligible {
            if !self.should_confirm(&play) {
                continue;
            }
            debug!(source = %self.source, play = %play, "confirmed play");
            self.confirmed.push_back(play.clone());
            if self.confirmed.len() > CONFIRMED_CAP {
                self.confirmed.pop_front();
            }
            newly_confirmed.push(play);
        }
        newly_confirmed
    }

    fn should_confirm(&self, play: &PlayRecord) -> bool {
        let prior: Vec<&PlayRecord> = self
            .confirmed
            .iter()
            .filter(|c| c.is_same_listen(play))
            .collect();
        if prior.is_empty() {
            return true;
        }

        // Same locked play date means this exact playback was already
        // confirmed and is simply still playing.
        if prior.iter().any(|c| c.data.play_date == play.data.play_date) {
            return false;
        }

        let Some(newest) = prior.iter().max_by_key(|c| c.data.play_date) else {
            return true;
        };
        match newest.data.duration {
            // Replay: the earlier playback must have had time to finish
            Some(duration) => {
                let finished_at =
                    newest.data.play_date + Duration::milliseconds((duration * 1000.0) as i64);
                play.data.play_date > finished_at
            }
            // No duration to reason with: refuse only an immediate repeat
            // of the most recently confirmed play
            None => self
                .confirmed
                .back()
                .map(|last| !last.is_same_listen(play))
                .unwrap_or(true),
        }
    }

    /// Number of plays currently under watch
    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }
}
