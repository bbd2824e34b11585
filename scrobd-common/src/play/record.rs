//! Canonical representation of one listen event
//!
//! A [`PlayRecord`] is immutable by convention: transforms and the detector
//! produce modified copies rather than mutating in place. The `data` half
//! is what a human would recognize as the listen; the `meta` half carries
//! source bookkeeping used by the pipeline.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Whether a play's timestamp anchors to the start or the end of playback.
///
/// Sources disagree on this: some report "the track started at T", others
/// "the track finished at T". Temporal comparison aligns the two with the
/// track duration before measuring closeness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampAnchor {
    /// Timestamp is the moment playback started
    Start,
    /// Timestamp is the moment playback ended
    End,
    /// The source does not say; both interpretations are considered
    #[default]
    Unknown,
}

/// A contiguous span of seconds the listener actually heard
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ListenRange {
    /// Range start, seconds into the track
    pub start: f64,
    /// Range end, seconds into the track
    pub end: f64,
}

/// The listen itself: who/what/when
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayData {
    /// Ordered artist credits; may contain duplicates, which are removed
    /// with set semantics at formatting and comparison time
    #[serde(default)]
    pub artists: Vec<String>,

    /// Album-level artist credits
    #[serde(default)]
    pub album_artists: Vec<String>,

    /// Album title
    pub album: Option<String>,

    /// Track title. May become `None` after a transform rule empties it;
    /// consumers treat absence as "unusable for matching", not an error.
    pub track: Option<String>,

    /// Track duration in seconds
    pub duration: Option<f64>,

    /// The timestamp the play is anchored to (see [`TimestampAnchor`])
    pub play_date: DateTime<Utc>,

    /// Seconds actually listened, when the source reports it
    pub listened_for: Option<f64>,

    /// Listened spans, when the source reports them
    #[serde(default)]
    pub listen_ranges: Vec<ListenRange>,
}

/// Pipeline bookkeeping attached to a play
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayMeta {
    /// Identifier of the source that produced this play
    pub source: String,

    /// Source-native unique track id, when the source has one
    pub track_id: Option<String>,

    /// Process-assigned id for an in-flight queued item
    pub play_id: Option<Uuid>,

    /// True for a freshly observed play, false for backlog/history items
    #[serde(default)]
    pub new_from_source: bool,

    /// Playback device identifier, when known
    pub device_id: Option<String>,

    /// Timestamp semantics for `play_date`
    #[serde(default)]
    pub anchor: TimestampAnchor,

    /// Playback position within the track at observation time, seconds
    pub track_progress_position: Option<f64>,

    /// Arbitrary source-specific fields, passed through untouched
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PlayMeta {
    /// Meta block with only a source name set
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            track_id: None,
            play_id: None,
            new_from_source: false,
            device_id: None,
            anchor: TimestampAnchor::Unknown,
            track_progress_position: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// One listen event flowing through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayRecord {
    pub data: PlayData,
    pub meta: PlayMeta,
}

impl PlayRecord {
    /// Build a minimal play; the `with_*` methods fill in the rest
    pub fn new<S, T>(source: S, track: T, artists: Vec<String>, play_date: DateTime<Utc>) -> Self
    where
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            data: PlayData {
                artists,
                album_artists: Vec::new(),
                album: None,
                track: Some(track.into()),
                duration: None,
                play_date,
                listened_for: None,
                listen_ranges: Vec::new(),
            },
            meta: PlayMeta::for_source(source),
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.data.album = Some(album.into());
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.data.duration = Some(seconds);
        self
    }

    pub fn with_track_id(mut self, track_id: impl Into<String>) -> Self {
        self.meta.track_id = Some(track_id.into());
        self
    }

    pub fn with_anchor(mut self, anchor: TimestampAnchor) -> Self {
        self.meta.anchor = anchor;
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.meta.device_id = Some(device_id.into());
        self
    }

    /// Normalized artist set (trimmed, lowercased, whitespace-folded,
    /// duplicates collapsed)
    pub fn normalized_artists(&self) -> BTreeSet<String> {
        self.data
            .artists
            .iter()
            .map(|a| normalize(a))
            .filter(|a| !a.is_empty())
            .collect()
    }

    /// Identity rule shared by the play detector and matcher stage A.
    ///
    /// Two plays are the same logical listen iff their source and
    /// source-native track id agree when both sides carry one, otherwise
    /// iff normalized track, album and artist set all agree. A play with
    /// no track never identity-matches. A missing album on either side is
    /// treated as a wildcard since sources differ in whether they report
    /// one at all.
    pub fn is_same_listen(&self, other: &PlayRecord) -> bool {
        if let (Some(a), Some(b)) = (&self.meta.track_id, &other.meta.track_id) {
            return self.meta.source == other.meta.source && a == b;
        }

        let (track_a, track_b) = match (&self.data.track, &other.data.track) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        if normalize(track_a) != normalize(track_b) {
            return false;
        }

        if let (Some(a), Some(b)) = (&self.data.album, &other.data.album) {
            if normalize(a) != normalize(b) {
                return false;
            }
        }

        self.normalized_artists() == other.normalized_artists()
    }

    /// Structural validation: a play carrying neither a track title nor any
    /// artist cannot be matched or submitted and is dropped by its poller.
    pub fn validate(&self) -> Result<()> {
        let has_track = self
            .data
            .track
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false);
        if !has_track && self.normalized_artists().is_empty() {
            return Err(Error::InvalidPlay(format!(
                "play from {} has neither track nor artists",
                self.meta.source
            )));
        }
        Ok(())
    }
}

impl fmt::Display for PlayRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Set semantics for artists at formatting time
        let mut seen = BTreeSet::new();
        let artists: Vec<&str> = self
            .data
            .artists
            .iter()
            .filter(|a| seen.insert(normalize(a)))
            .map(|a| a.as_str())
            .collect();

        let artists = if artists.is_empty() {
            "(unknown artist)".to_string()
        } else {
            artists.join(" / ")
        };
        let track = self.data.track.as_deref().unwrap_or("(unknown track)");

        write!(f, "{} - {}", artists, track)?;
        if let Some(album) = &self.data.album {
            write!(f, " ({})", album)?;
        }
        write!(f, " @ {}", self.data.play_date.to_rfc3339())
    }
}

/// Normalize a metadata string for comparison: trim, collapse internal
/// whitespace, lowercase
pub fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
