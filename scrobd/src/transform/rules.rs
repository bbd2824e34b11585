//! Search-and-replace rule definitions
//!
//! Rules arrive as plain strings from configuration and are compiled into
//! regexes once at load time, so a bad pattern is a config error rather
//! than a runtime surprise.

use regex::Regex;
use serde::{Deserialize, Serialize};

use scrobd_common::play::PlayRecord;

use crate::{Error, Result};

/// Which play field a rule rewrites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    Title,
    Artists,
    AlbumArtists,
    Album,
}

/// Guard conditions evaluated against the *original* play, before any rule
/// in the hook has run. All present patterns must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhenConfig {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

/// One search-and-replace rule as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub field: RuleField,
    pub search: String,
    #[serde(default)]
    pub replace: String,
    pub when: Option<WhenConfig>,
}

/// Compiled guard predicate
#[derive(Debug)]
pub struct WhenPredicate {
    title: Option<Regex>,
    artist: Option<Regex>,
    album: Option<Regex>,
}

impl WhenPredicate {
    fn compile(cfg: &WhenConfig) -> Result<Self> {
        Ok(Self {
            title: cfg.title.as_deref().map(compile_regex).transpose()?,
            artist: cfg.artist.as_deref().map(compile_regex).transpose()?,
            album: cfg.album.as_deref().map(compile_regex).transpose()?,
        })
    }

    /// All present patterns must match the original play; a pattern whose
    /// target field is absent fails the guard.
    pub fn matches(&self, original: &PlayRecord) -> bool {
        if let Some(re) = &self.title {
            match original.data.track.as_deref() {
                Some(track) if re.is_match(track) => {}
                _ => return false,
            }
        }
        if let Some(re) = &self.artist {
            if !original.data.artists.iter().any(|a| re.is_match(a)) {
                return false;
            }
        }
        if let Some(re) = &self.album {
            match original.data.album.as_deref() {
                Some(album) if re.is_match(album) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Compiled search-and-replace rule
#[derive(Debug)]
pub struct SearchAndReplace {
    pub field: RuleField,
    search: Regex,
    replace: String,
    when: Option<WhenPredicate>,
}

impl SearchAndReplace {
    pub fn compile(cfg: &RuleConfig) -> Result<Self> {
        Ok(Self {
            field: cfg.field,
            search: compile_regex(&cfg.search)?,
            replace: cfg.replace.clone(),
            when: cfg.when.as_ref().map(WhenPredicate::compile).transpose()?,
        })
    }

    /// Whether the guard (if any) lets this rule run against `original`
    pub fn applies_to(&self, original: &PlayRecord) -> bool {
        self.when.as_ref().map(|w| w.matches(original)).unwrap_or(true)
    }

    /// Rewrite a single value. A result that trims to empty means the
    /// field is unset, not empty-string.
    pub fn apply(&self, value: &str) -> Option<String> {
        let replaced = self.search.replace_all(value, self.replace.as_str());
        let trimmed = replaced.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::Config(format!("invalid transform pattern '{}': {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rule(field: RuleField, search: &str, replace: &str) -> SearchAndReplace {
        SearchAndReplace::compile(&RuleConfig {
            field,
            search: search.into(),
            replace: replace.into(),
            when: None,
        })
        .unwrap()
    }

    #[test]
    fn test_apply_replaces_and_trims() {
        let r = rule(RuleField::Title, r"\s*\(Remastered.*\)$", "");
        assert_eq!(
            r.apply("Blue Monday (Remastered 2016)").as_deref(),
            Some("Blue Monday")
        );
        assert_eq!(r.apply("Blue Monday").as_deref(), Some("Blue Monday"));
    }

    #[test]
    fn test_apply_empty_result_is_unset() {
        let r = rule(RuleField::Title, r".*", "");
        assert_eq!(r.apply("anything"), None);
    }

    #[test]
    fn test_when_guard_checks_original() {
        let cfg = RuleConfig {
            field: RuleField::Title,
            search: "feat\\..*".into(),
            replace: "".into(),
            when: Some(WhenConfig {
                artist: Some("^New Order$".into()),
                ..Default::default()
            }),
        };
        let r = SearchAndReplace::compile(&cfg).unwrap();

        let matching = scrobd_common::play::PlayRecord::new(
            "test",
            "Crystal feat. Nobody",
            vec!["New Order".into()],
            Utc::now(),
        );
        let other = scrobd_common::play::PlayRecord::new(
            "test",
            "Crystal feat. Nobody",
            vec!["Someone Else".into()],
            Utc::now(),
        );
        assert!(r.applies_to(&matching));
        assert!(!r.applies_to(&other));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let cfg = RuleConfig {
            field: RuleField::Album,
            search: "(".into(),
            replace: "".into(),
            when: None,
        };
        assert!(SearchAndReplace::compile(&cfg).is_err());
    }
}
