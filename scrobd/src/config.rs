//! Daemon configuration
//!
//! A single TOML file carries daemon tuning, per-source and per-client
//! settings and the transform rules. The config path resolves in priority
//! order: CLI argument, then the `SCROBD_CONFIG` environment variable, then
//! the platform config directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clients::ClientSettings;
use crate::sources::SourceSettings;
use crate::transform::{TransformConfig, TransformPipeline};
use crate::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SCROBD_CONFIG";

/// Daemon-wide tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Event bus buffer per subscriber
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Seconds between dead-letter retry sweeps
    #[serde(default = "default_dead_letter_interval")]
    pub dead_letter_interval_secs: u64,
}

fn default_event_capacity() -> usize {
    256
}
fn default_dead_letter_interval() -> u64 {
    30
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            dead_letter_interval_secs: default_dead_letter_interval(),
        }
    }
}

/// Full configuration file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub daemon: DaemonSettings,

    #[serde(default)]
    pub sources: Vec<SourceSettings>,

    #[serde(default)]
    pub clients: Vec<ClientSettings>,

    #[serde(default)]
    pub transforms: TransformConfig,
}

impl DaemonConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: DaemonConfig = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate names and transform patterns without building anything
    pub fn validate(&self) -> Result<()> {
        let mut source_names = BTreeSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(Error::Config("source with empty name".into()));
            }
            if !source_names.insert(source.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
        }

        let mut client_names = BTreeSet::new();
        for client in &self.clients {
            if client.name.trim().is_empty() {
                return Err(Error::Config("client with empty name".into()));
            }
            if !client_names.insert(client.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate client name '{}'",
                    client.name
                )));
            }
        }

        // Compile once so a bad pattern fails at load, not mid-pipeline
        TransformPipeline::from_config(&self.transforms)?;
        Ok(())
    }

    pub fn source_settings(&self, name: &str) -> Option<&SourceSettings> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn client_settings(&self, name: &str) -> Option<&ClientSettings> {
        self.clients.iter().find(|c| c.name == name)
    }
}

/// Resolve the config file path: CLI argument, environment variable, then
/// the platform config directory
pub fn resolve_config_path(cli_arg: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path;
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .map(|d| d.join("scrobd").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("scrobd.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_full_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[daemon]
event_capacity = 64
dead_letter_interval_secs = 15

[[sources]]
name = "jellyfin"
interval_secs = 20
granularity_secs = 60.0

[[clients]]
name = "maloja"
scrobble_delay_secs = 2.0

[[transforms.pre_compare]]
field = "title"
search = "\\s*\\(Remastered\\)$"
replace = ""
"#
        )
        .unwrap();

        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.daemon.event_capacity, 64);
        assert_eq!(config.daemon.dead_letter_interval_secs, 15);

        let source = config.source_settings("jellyfin").unwrap();
        assert_eq!(source.interval_secs, 20);
        assert_eq!(source.granularity_secs, 60.0);
        // Unspecified fields fall back to defaults
        assert_eq!(source.max_poll_retries, 1);

        let client = config.client_settings("maloja").unwrap();
        assert_eq!(client.scrobble_delay_secs, 2.0);
        assert!(client.check_existing_scrobbles);

        assert_eq!(config.transforms.pre_compare.len(), 1);
    }

    #[test]
    fn test_duplicate_source_names_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[sources]]
name = "a"

[[sources]]
name = "a"
"#
        )
        .unwrap();
        assert!(DaemonConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_invalid_transform_pattern_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[transforms.candidate]]
field = "title"
search = "("
"#
        )
        .unwrap();
        assert!(DaemonConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = DaemonConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.daemon.event_capacity, 256);
    }
}
