//! Configuration file support for Dosewise.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/dosewise/config.toml`.
//! All lifecycle timing knobs (undo window, missed grace period,
//! lateness thresholds, streak milestones) live here as an explicit,
//! immutable object handed to the engines at construction — never as
//! ambient global state.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub adherence: AdherenceConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Lifecycle timing configuration
///
/// The undo window and the missed grace period are the only two
/// timeouts in the core, and they are independent of each other.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// How long a take remains reversible, in seconds; 0 disables undo
    /// and takes confirm immediately
    #[serde(default = "default_undo_window_seconds")]
    pub undo_window_seconds: i64,

    /// How long past the scheduled time a dose stays pending before
    /// the sweep marks it missed, in minutes
    #[serde(default = "default_missed_grace_minutes")]
    pub missed_grace_minutes: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            undo_window_seconds: default_undo_window_seconds(),
            missed_grace_minutes: default_missed_grace_minutes(),
        }
    }
}

/// Adherence scoring and streak configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdherenceConfig {
    /// Taken earlier than this many minutes before schedule → early
    #[serde(default = "default_early_minutes")]
    pub early_minutes: i64,

    /// Lateness up to this many minutes still counts as on time
    #[serde(default = "default_on_time_minutes")]
    pub on_time_minutes: i64,

    /// Lateness up to this many minutes counts as late; beyond is very late
    #[serde(default = "default_late_minutes")]
    pub late_minutes: i64,

    /// Lateness at which the adherence score bottoms out at zero
    #[serde(default = "default_score_floor_minutes")]
    pub score_floor_minutes: i64,

    /// Streak milestones in days, ascending; each fires at most once
    /// per crossing
    #[serde(default = "default_milestone_days")]
    pub milestone_days: Vec<u32>,
}

impl Default for AdherenceConfig {
    fn default() -> Self {
        Self {
            early_minutes: default_early_minutes(),
            on_time_minutes: default_on_time_minutes(),
            late_minutes: default_late_minutes(),
            score_floor_minutes: default_score_floor_minutes(),
            milestone_days: default_milestone_days(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        let home = std::env::var("HOME").expect("HOME environment variable not set");
        PathBuf::from(home).join(".local/share")
    });
    base.join("dosewise")
}

fn default_undo_window_seconds() -> i64 {
    30
}

fn default_missed_grace_minutes() -> i64 {
    60
}

fn default_early_minutes() -> i64 {
    15
}

fn default_on_time_minutes() -> i64 {
    30
}

fn default_late_minutes() -> i64 {
    120
}

fn default_score_floor_minutes() -> i64 {
    240
}

fn default_milestone_days() -> Vec<u32> {
    vec![7, 30, 90]
}

impl EngineConfig {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            let home = std::env::var("HOME").expect("HOME environment variable not set");
            PathBuf::from(home).join(".config")
        });
        base.join("dosewise").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Check internal consistency of the timing knobs
    pub fn validate(&self) -> Result<()> {
        if self.lifecycle.undo_window_seconds < 0 {
            return Err(Error::Config(
                "lifecycle.undo_window_seconds must not be negative".into(),
            ));
        }
        if self.lifecycle.missed_grace_minutes <= 0 {
            return Err(Error::Config(
                "lifecycle.missed_grace_minutes must be positive".into(),
            ));
        }
        if self.adherence.on_time_minutes > self.adherence.late_minutes {
            return Err(Error::Config(
                "adherence.on_time_minutes exceeds adherence.late_minutes".into(),
            ));
        }
        let mut prev = 0u32;
        for &m in &self.adherence.milestone_days {
            if m <= prev {
                return Err(Error::Config(
                    "adherence.milestone_days must be strictly ascending".into(),
                ));
            }
            prev = m;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.lifecycle.undo_window_seconds, 30);
        assert_eq!(config.lifecycle.missed_grace_minutes, 60);
        assert_eq!(config.adherence.milestone_days, vec![7, 30, 90]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(
            config.lifecycle.undo_window_seconds,
            parsed.lifecycle.undo_window_seconds
        );
        assert_eq!(config.adherence.milestone_days, parsed.adherence.milestone_days);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[lifecycle]
undo_window_seconds = 45
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.lifecycle.undo_window_seconds, 45);
        assert_eq!(config.lifecycle.missed_grace_minutes, 60); // default
    }

    #[test]
    fn test_unordered_milestones_rejected() {
        let mut config = EngineConfig::default();
        config.adherence.milestone_days = vec![30, 7, 90];
        assert!(config.validate().is_err());
    }
}
