//! Continuous player-state snapshots
//!
//! Sources that cannot list history expose the current state of each
//! playback surface instead. The stateful play detector turns a series of
//! these snapshots into discrete, confirmed plays.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PlayRecord;

/// Reported playback status of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Playing,
    Paused,
    Stopped,
    Unknown,
}

/// Uniquely identifies one playback surface: a device/user pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformId {
    pub device_id: String,
    pub user_id: String,
}

impl PlatformId {
    pub fn new(device_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device_id, self.user_id)
    }
}

/// One observation of one playback surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStateData {
    /// The surface this observation belongs to
    pub platform_id: PlatformId,
    /// What the surface reports as currently loaded
    pub play: PlayRecord,
    /// Whether it is actually playing
    pub status: PlayerStatus,
    /// Playback position in seconds, when reported
    pub position: Option<f64>,
    /// When the observation was taken
    pub timestamp: DateTime<Utc>,
}

impl PlayerStateData {
    pub fn new(
        platform_id: PlatformId,
        play: PlayRecord,
        status: PlayerStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            platform_id,
            play,
            status,
            position: None,
            timestamp,
        }
    }
}
