//! Temporal closeness classification
//!
//! Timestamps from different sources and clients disagree in granularity
//! and in anchor point (start vs end of play). Closeness between two plays
//! is therefore a discrete bucket derived from the smallest offset over the
//! anchor-alignment hypotheses that are actually plausible for the pair,
//! measured against the source's reporting tolerance.

use chrono::{DateTime, Duration, Utc};

use crate::play::{PlayRecord, TimestampAnchor};

/// Offsets at or below this many seconds count as the same instant
pub const EXACT_WINDOW_SECS: f64 = 1.0;

/// Fuzzy bucket extends to this multiple of the source tolerance
pub const FUZZY_GRACE_FACTOR: f64 = 1.5;

/// Discrete closeness of two play timestamps
///
/// Ordering: `None < Fuzzy < Close < Exact`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TemporalBucket {
    None,
    Fuzzy,
    Close,
    Exact,
}

impl TemporalBucket {
    /// Exact and Close are strong enough to short-circuit duplicate checks
    pub fn matches_closely(&self) -> bool {
        matches!(self, TemporalBucket::Exact | TemporalBucket::Close)
    }
}

fn seconds_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (a - b).num_milliseconds().abs() as f64 / 1000.0
}

fn shifted(date: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    date + Duration::milliseconds((seconds * 1000.0).round() as i64)
}

/// Smallest absolute offset in seconds between two plays over the
/// applicable anchor-alignment hypotheses.
///
/// When both sides declare the same anchor only the direct comparison
/// applies. When anchors differ, the start-anchored side is shifted by its
/// duration. When either side does not say, every hypothesis the known
/// durations allow is evaluated ("played at end" vs "played at start +
/// duration") and the smallest offset wins.
pub fn smallest_offset_secs(candidate: &PlayRecord, existing: &PlayRecord) -> f64 {
    use TimestampAnchor::{End, Start};

    let c = candidate.data.play_date;
    let e = existing.data.play_date;
    let c_dur = candidate.data.duration;
    let e_dur = existing.data.duration;

    let mut offsets = Vec::with_capacity(3);
    match (candidate.meta.anchor, existing.meta.anchor) {
        (Start, Start) | (End, End) => offsets.push(seconds_between(c, e)),
        (Start, End) => match c_dur {
            Some(d) => offsets.push(seconds_between(shifted(c, d), e)),
            None => offsets.push(seconds_between(c, e)),
        },
        (End, Start) => match e_dur {
            Some(d) => offsets.push(seconds_between(c, shifted(e, d))),
            None => offsets.push(seconds_between(c, e)),
        },
        _ => {
            offsets.push(seconds_between(c, e));
            if let Some(d) = c_dur {
                offsets.push(seconds_between(shifted(c, d), e));
            }
            if let Some(d) = e_dur {
                offsets.push(seconds_between(c, shifted(e, d)));
            }
        }
    }

    offsets.into_iter().fold(f64::INFINITY, f64::min)
}

/// Classify the closeness of two plays given the source's reporting
/// tolerance in seconds.
pub fn temporal_bucket(
    candidate: &PlayRecord,
    existing: &PlayRecord,
    tolerance_secs: f64,
) -> TemporalBucket {
    let offset = smallest_offset_secs(candidate, existing);
    if offset <= EXACT_WINDOW_SECS {
        TemporalBucket::Exact
    } else if offset <= tolerance_secs {
        TemporalBucket::Close
    } else if offset <= tolerance_secs * FUZZY_GRACE_FACTOR {
        TemporalBucket::Fuzzy
    } else {
        TemporalBucket::None
    }
}
