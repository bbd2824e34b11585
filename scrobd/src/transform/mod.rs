//! Transform pipeline
//!
//! User-configured search-and-replace rules applied at four hook points:
//! once when a play is enqueued (`PreCompare`), symmetrically to both sides
//! of a duplicate comparison (`Candidate` / `Existing`), and just before
//! submission (`PostCompare`). Rules within a hook chain: the output of one
//! feeds the next. Guards always evaluate against the original play, not
//! intermediate rewrites.

mod rules;

use serde::{Deserialize, Serialize};

use scrobd_common::play::PlayRecord;

pub use rules::{RuleConfig, RuleField, SearchAndReplace, WhenConfig, WhenPredicate};

use crate::Result;

/// Where in the pipeline a rule set runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformHook {
    /// Applied once when a play enters a client queue
    PreCompare,
    /// Applied to the incoming play just before matching
    Candidate,
    /// Applied to each historical play just before matching
    Existing,
    /// Applied just before submission, after "not a duplicate"
    PostCompare,
}

/// Rule sets per hook, as written in the config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default)]
    pub pre_compare: Vec<RuleConfig>,
    #[serde(default)]
    pub candidate: Vec<RuleConfig>,
    #[serde(default)]
    pub existing: Vec<RuleConfig>,
    #[serde(default)]
    pub post_compare: Vec<RuleConfig>,
}

/// Compiled transform pipeline; pure, shared read-only across workers
#[derive(Debug, Default)]
pub struct TransformPipeline {
    pre_compare: Vec<SearchAndReplace>,
    candidate: Vec<SearchAndReplace>,
    existing: Vec<SearchAndReplace>,
    post_compare: Vec<SearchAndReplace>,
}

impl TransformPipeline {
    pub fn from_config(cfg: &TransformConfig) -> Result<Self> {
        Ok(Self {
            pre_compare: compile_all(&cfg.pre_compare)?,
            candidate: compile_all(&cfg.candidate)?,
            existing: compile_all(&cfg.existing)?,
            post_compare: compile_all(&cfg.post_compare)?,
        })
    }

    fn rules(&self, hook: TransformHook) -> &[SearchAndReplace] {
        match hook {
            TransformHook::PreCompare => &self.pre_compare,
            TransformHook::Candidate => &self.candidate,
            TransformHook::Existing => &self.existing,
            TransformHook::PostCompare => &self.post_compare,
        }
    }

    pub fn is_empty(&self, hook: TransformHook) -> bool {
        self.rules(hook).is_empty()
    }

    /// Apply a hook's rules to a play, returning the rewritten copy
    pub fn apply(&self, hook: TransformHook, play: &PlayRecord) -> PlayRecord {
        let rules = self.rules(hook);
        if rules.is_empty() {
            return play.clone();
        }

        let original = play;
        let mut out = play.clone();
        for rule in rules {
            if !rule.applies_to(original) {
                continue;
            }
            match rule.field {
                RuleField::Title => {
                    out.data.track = out.data.track.as_deref().and_then(|v| rule.apply(v));
                }
                RuleField::Album => {
                    out.data.album = out.data.album.as_deref().and_then(|v| rule.apply(v));
                }
                RuleField::Artists => {
                    out.data.artists = apply_to_list(rule, &out.data.artists);
                }
                RuleField::AlbumArtists => {
                    out.data.album_artists = apply_to_list(rule, &out.data.album_artists);
                }
            }
        }
        out
    }
}

fn apply_to_list(rule: &SearchAndReplace, values: &[String]) -> Vec<String> {
    values.iter().filter_map(|v| rule.apply(v)).collect()
}

fn compile_all(configs: &[RuleConfig]) -> Result<Vec<SearchAndReplace>> {
    configs.iter().map(SearchAndReplace::compile).collect()
}
