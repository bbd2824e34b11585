//! Duplicate matching against a client's history
//!
//! No single signal is reliable across sources: timestamps differ in
//! granularity and anchor point, titles and artist lists differ in
//! formatting, and not every client returns stable ids. Matching is
//! therefore two-staged: an exact identity check against what this process
//! already submitted, then a weighted fuzzy score against the history the
//! client itself reports.

use std::collections::BTreeSet;

use scrobd_common::play::{normalize, PlayRecord, ScrobbledPlayObject};
use scrobd_common::time::{temporal_bucket, TemporalBucket};

use crate::transform::{TransformHook, TransformPipeline};

pub const TIME_WEIGHT: f64 = 0.5;
pub const TITLE_WEIGHT: f64 = 0.3;
pub const ARTIST_WEIGHT: f64 = 0.2;

/// Weighted total at or above this is a duplicate. Pinned by the pipeline's
/// behavioral contract: close time with full title and artist agreement
/// must match (1.0), fuzzy time with otherwise perfect agreement must not
/// (0.8), and close time with artist agreement alone must not (0.7).
pub const DUP_SCORE_THRESHOLD: f64 = 0.9;

/// Artist whole-match bonus tuning. The constants are empirical and must
/// not be re-derived; users tune real-world vendor metadata around them.
const ARTIST_BONUS_WEIGHT_BUMP: f64 = 0.05;
const ARTIST_BONUS_OVERLAP_FLOOR: f64 = 0.5;
const ARTIST_BONUS_TITLE_MIN: f64 = 0.75;
const ARTIST_BONUS_MIN_OVERLAP: f64 = 0.1;

/// Absorbs float rounding at the threshold boundary
const SCORE_EPSILON: f64 = 1e-9;

/// Component scores for one candidate/existing comparison
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub time_match: f64,
    pub title_similarity: f64,
    pub artist_overlap: f64,
    pub bonus_applied: bool,
    pub total: f64,
}

impl ScoreBreakdown {
    pub fn is_duplicate(&self) -> bool {
        self.total + SCORE_EPSILON >= DUP_SCORE_THRESHOLD
    }
}

/// Outcome of a duplicate check, with diagnostics
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// The historical play the candidate duplicates, if any
    pub matched: Option<PlayRecord>,
    /// True when stage A (exact submitted match) short-circuited
    pub exact: bool,
    /// Score of the winning match (absent for stage A hits)
    pub breakdown: Option<ScoreBreakdown>,
    /// Highest-scoring rejected comparison, for diagnostics
    pub best_non_match: Option<(PlayRecord, ScoreBreakdown)>,
}

impl MatchResult {
    pub fn is_duplicate(&self) -> bool {
        self.matched.is_some()
    }
}

/// Decide whether `candidate` is already represented in this client's
/// history.
///
/// `submitted` is the client's own memory of recent successful submissions
/// (stage A); `recent` is what the client reports when asked (stage B).
/// Stage B only runs when `recent` is non-empty: an empty cache means
/// "assume not yet scrobbled", never "assume duplicate". Both sides of
/// every stage B comparison pass through the candidate/existing transform
/// hooks first.
pub fn find_existing_scrobble(
    candidate: &PlayRecord,
    submitted: &[ScrobbledPlayObject],
    recent: &[PlayRecord],
    transforms: &TransformPipeline,
    tolerance_secs: f64,
) -> MatchResult {
    // Stage A: exact identity plus temporal closeness against what we sent
    for sent in submitted {
        if candidate.is_same_listen(&sent.play)
            && temporal_bucket(candidate, &sent.play, tolerance_secs).matches_closely()
        {
            return MatchResult {
                matched: Some(sent.play.clone()),
                exact: true,
                breakdown: None,
                best_non_match: None,
            };
        }
    }

    if recent.is_empty() {
        return MatchResult::default();
    }

    // Stage B: weighted fuzzy scoring against client-reported history
    let candidate_t = transforms.apply(TransformHook::Candidate, candidate);

    let mut best_match: Option<(PlayRecord, ScoreBreakdown)> = None;
    let mut best_non_match: Option<(PlayRecord, ScoreBreakdown)> = None;
    for existing in recent {
        let existing_t = transforms.apply(TransformHook::Existing, existing);
        let breakdown = score_plays(&candidate_t, &existing_t, tolerance_secs);
        let slot = if breakdown.is_duplicate() {
            &mut best_match
        } else {
            &mut best_non_match
        };
        let better = slot
            .as_ref()
            .map(|(_, prev)| breakdown.total > prev.total)
            .unwrap_or(true);
        if better {
            *slot = Some((existing.clone(), breakdown));
        }
    }

    match best_match {
        Some((play, breakdown)) => MatchResult {
            matched: Some(play),
            exact: false,
            breakdown: Some(breakdown),
            best_non_match,
        },
        None => MatchResult {
            matched: None,
            exact: false,
            breakdown: None,
            best_non_match,
        },
    }
}

/// Score one candidate/existing pair
pub fn score_plays(
    candidate: &PlayRecord,
    existing: &PlayRecord,
    tolerance_secs: f64,
) -> ScoreBreakdown {
    let bucket = temporal_bucket(candidate, existing, tolerance_secs);
    let time_match = match bucket {
        TemporalBucket::Exact | TemporalBucket::Close => 1.0,
        TemporalBucket::Fuzzy => 0.6,
        TemporalBucket::None => 0.0,
    };

    let title_similarity = title_similarity(
        candidate.data.track.as_deref(),
        existing.data.track.as_deref(),
    );

    let candidate_artists = candidate.normalized_artists();
    let existing_artists = existing.normalized_artists();
    let artist_overlap = jaccard(&candidate_artists, &existing_artists);

    let mut total = TIME_WEIGHT * time_match
        + TITLE_WEIGHT * title_similarity
        + ARTIST_WEIGHT * artist_overlap;
    let mut bonus_applied = false;

    // Artist whole-match bonus: sources that report only a primary artist
    // against sources that report the full credit list produce a weak
    // overlap even for the same listen. When time and title agree strongly
    // and at least one artist matches exactly, the artist component is
    // recomputed with a floor and a bumped weight.
    if total + SCORE_EPSILON < DUP_SCORE_THRESHOLD
        && bucket.matches_closely()
        && title_similarity >= ARTIST_BONUS_TITLE_MIN
        && artist_overlap > ARTIST_BONUS_MIN_OVERLAP
        && (candidate_artists.len() > 1 || existing_artists.len() > 1)
        && candidate_artists.intersection(&existing_artists).next().is_some()
    {
        let boosted = (ARTIST_WEIGHT + ARTIST_BONUS_WEIGHT_BUMP)
            * artist_overlap.max(ARTIST_BONUS_OVERLAP_FLOOR);
        total = TIME_WEIGHT * time_match + TITLE_WEIGHT * title_similarity + boosted;
        bonus_applied = true;
    }

    ScoreBreakdown {
        time_match,
        title_similarity,
        artist_overlap,
        bonus_applied,
        total,
    }
}

/// Normalized title similarity: the mean of Jaro-Winkler and normalized
/// Levenshtein over case/whitespace-folded titles. Absent titles never
/// contribute to a match.
pub fn title_similarity(a: Option<&str>, b: Option<&str>) -> f64 {
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (normalize(a), normalize(b)),
        _ => return 0.0,
    };
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    (strsim::jaro_winkler(&a, &b) + strsim::normalized_levenshtein(&a, &b)) / 2.0
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use scrobd_common::play::TimestampAnchor;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn play(track: &str, artists: &[&str], offset_secs: i64) -> PlayRecord {
        PlayRecord::new(
            "test",
            track,
            artists.iter().map(|a| a.to_string()).collect(),
            base() + Duration::seconds(offset_secs),
        )
    }

    fn no_transforms() -> TransformPipeline {
        TransformPipeline::default()
    }

    #[test]
    fn test_idempotent_dedup_via_submitted_cache() {
        let sent = play("Crystal", &["New Order"], 0);
        let submitted = vec![ScrobbledPlayObject {
            play: sent.clone(),
            scrobble: sent,
        }];

        // Same logical play, within the close-time window
        let again = play("Crystal", &["New Order"], 5);
        let result = find_existing_scrobble(&again, &submitted, &[], &no_transforms(), 10.0);
        assert!(result.is_duplicate());
        assert!(result.exact);
    }

    #[test]
    fn test_non_interference_title_only_difference() {
        let existing = vec![play("Temptation", &["New Order"], 0)];
        let candidate = play("Blue Monday", &["New Order"], 2);

        let result = find_existing_scrobble(&candidate, &[], &existing, &no_transforms(), 10.0);
        assert!(!result.is_duplicate());
        // The rejected comparison is still reported for diagnostics
        let (_, breakdown) = result.best_non_match.expect("diagnostic breakdown");
        assert_eq!(breakdown.time_match, 1.0);
        assert!(breakdown.title_similarity < 0.67);
    }

    #[test]
    fn test_granularity_tolerance_low() {
        let existing = vec![play("Crystal", &["New Order"], 0)];
        let dup = play("Crystal", &["New Order"], 59);
        let not_dup = play("Crystal", &["New Order"], 61);

        assert!(find_existing_scrobble(&dup, &[], &existing, &no_transforms(), 60.0).is_duplicate());
        assert!(
            !find_existing_scrobble(&not_dup, &[], &existing, &no_transforms(), 60.0)
                .is_duplicate()
        );
    }

    #[test]
    fn test_granularity_tolerance_high() {
        let existing = vec![play("Crystal", &["New Order"], 0)];
        let dup = play("Crystal", &["New Order"], 10);
        let not_dup = play("Crystal", &["New Order"], 11);

        assert!(find_existing_scrobble(&dup, &[], &existing, &no_transforms(), 10.0).is_duplicate());
        assert!(
            !find_existing_scrobble(&not_dup, &[], &existing, &no_transforms(), 10.0)
                .is_duplicate()
        );
    }

    #[test]
    fn test_continuity_sequel_not_duplicate() {
        // "Part 1" played to completion, "Part 2" starting at duration + 1.
        // Both carry the same anchor semantics, so the duration-shift
        // hypothesis does not apply and the plays sit 181s apart.
        let part1 = play("Decades Part 1", &["New Order"], 0)
            .with_duration(180.0)
            .with_anchor(TimestampAnchor::Start);
        let part2 = play("Decades Part 2", &["New Order"], 181)
            .with_duration(180.0)
            .with_anchor(TimestampAnchor::Start);

        let result = find_existing_scrobble(&part2, &[], &[part1], &no_transforms(), 10.0);
        assert!(!result.is_duplicate());
    }

    #[test]
    fn test_empty_history_means_not_scrobbled() {
        let candidate = play("Crystal", &["New Order"], 0);
        let result = find_existing_scrobble(&candidate, &[], &[], &no_transforms(), 10.0);
        assert!(!result.is_duplicate());
    }

    #[test]
    fn test_absent_title_never_matches() {
        let mut candidate = play("Crystal", &["New Order"], 0);
        candidate.data.track = None;
        let existing = vec![play("Crystal", &["New Order"], 2)];

        let result = find_existing_scrobble(&candidate, &[], &existing, &no_transforms(), 10.0);
        assert!(!result.is_duplicate());
    }

    #[test]
    fn test_primary_artist_source_matches_without_bonus() {
        // One source reports only the primary artist of a duo: overlap 0.5
        // reaches the threshold exactly
        let existing = vec![play("Crystal", &["New Order", "Gillian Gilbert"], 0)];
        let candidate = play("Crystal", &["New Order"], 3);

        let result = find_existing_scrobble(&candidate, &[], &existing, &no_transforms(), 10.0);
        assert!(result.is_duplicate());
        let breakdown = result.breakdown.unwrap();
        assert!(!breakdown.bonus_applied);
    }

    #[test]
    fn test_artist_bonus_rescues_partial_credit_lists() {
        // One-of-three overlap (jaccard 1/3) scores 0.867 raw; the bonus
        // recomputes the artist component and lifts it past the threshold
        let existing = vec![play("Crystal", &["New Order", "Someone", "Else"], 0)];
        let candidate = play("Crystal", &["New Order"], 3);

        let result = find_existing_scrobble(&candidate, &[], &existing, &no_transforms(), 10.0);
        assert!(result.is_duplicate());
        let breakdown = result.breakdown.unwrap();
        assert!(breakdown.bonus_applied);
        assert!((breakdown.artist_overlap - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_artist_bonus_requires_exact_artist_match() {
        // Overlapping-ish but no exact artist in common: bonus must not fire
        let existing = vec![play("Crystal", &["New Order", "Someone", "Else"], 0)];
        let candidate = play("Crystal", &["Joy Division"], 3);

        let result = find_existing_scrobble(&candidate, &[], &existing, &no_transforms(), 10.0);
        assert!(!result.is_duplicate());
        let (_, breakdown) = result.best_non_match.unwrap();
        assert!(!breakdown.bonus_applied);
    }

    #[test]
    fn test_fuzzy_time_alone_is_not_enough() {
        // Perfect title and artists but only fuzzy time: 0.8 < threshold
        let existing = vec![play("Crystal", &["New Order"], 0)];
        let candidate = play("Crystal", &["New Order"], 12);

        let result = find_existing_scrobble(&candidate, &[], &existing, &no_transforms(), 10.0);
        assert!(!result.is_duplicate());
        let (_, breakdown) = result.best_non_match.unwrap();
        assert!((breakdown.total - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_symmetric_transforms_align_both_sides() {
        use crate::transform::{RuleConfig, RuleField, TransformConfig};

        // The client decorates titles with "(Remastered)"; symmetric
        // candidate/existing rules strip it before comparison
        let cfg = TransformConfig {
            candidate: vec![RuleConfig {
                field: RuleField::Title,
                search: r"\s*\(Remastered\)$".into(),
                replace: "".into(),
                when: None,
            }],
            existing: vec![RuleConfig {
                field: RuleField::Title,
                search: r"\s*\(Remastered\)$".into(),
                replace: "".into(),
                when: None,
            }],
            ..Default::default()
        };
        let transforms = TransformPipeline::from_config(&cfg).unwrap();

        let existing = vec![play("Crystal (Remastered)", &["New Order"], 0)];
        let candidate = play("Crystal", &["New Order"], 3);

        let result = find_existing_scrobble(&candidate, &[], &existing, &transforms, 10.0);
        assert!(result.is_duplicate());
    }
}
