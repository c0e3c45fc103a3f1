//! Configuration types for replay sessions

use crate::error::{ReplayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main configuration for a replay session
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReplayConfig {
    /// Log files to replay
    pub files: Vec<PathBuf>,

    /// Prefix prepended to every task display name
    pub prefix: String,

    /// Task name patterns to replay (regular expressions, full match).
    /// Empty replays everything.
    pub whitelist: Vec<String>,

    /// Recorded task name mapped to the name it is replayed under
    pub renamings: BTreeMap<String, String>,

    /// Playback configuration
    pub playback: PlaybackConfig,

    /// Task lifecycle configuration
    pub lifecycle: LifecycleConfig,
}

/// Playback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Initial speed factor (1.0 = recorded pace)
    pub speed: f64,

    /// Restart from the start of the span after the last sample
    pub loop_playback: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            loop_playback: false,
        }
    }
}

impl PlaybackConfig {
    /// Set the initial speed factor
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Enable or disable looping
    pub fn with_loop(mut self, loop_playback: bool) -> Self {
        self.loop_playback = loop_playback;
        self
    }
}

/// Task lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Port whose integer samples carry the task status
    pub status_port: String,

    /// Send a start request for status codes outside the known table
    pub unknown_status_starts_task: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            status_port: "state".to_string(),
            unknown_status_starts_task: false,
        }
    }
}

impl ReplayConfig {
    /// Create a default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the files to replay
    pub fn with_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Set the task name prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the task whitelist
    pub fn with_whitelist<I, S>(mut self, whitelist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist = whitelist.into_iter().map(Into::into).collect();
        self
    }

    /// Replay task `from` under the name `to`
    pub fn with_renaming(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renamings.insert(from.into(), to.into());
        self
    }

    /// Set the initial speed factor
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.playback.speed = speed;
        self
    }

    /// Enable or disable looping
    pub fn with_loop(mut self, loop_playback: bool) -> Self {
        self.playback.loop_playback = loop_playback;
        self
    }

    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (logplay.toml)
    /// 3. File named by LOGPLAY_CONFIG_PATH, if set
    /// 4. Environment variable overrides (`LOGPLAY_PLAYBACK__SPEED=2.0`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is invalid or the result
    /// fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(ReplayConfig::default()))
            .merge(Toml::file("logplay.toml"));

        if let Ok(path) = std::env::var("LOGPLAY_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: ReplayConfig = figment
            .merge(Env::prefixed("LOGPLAY_").ignore(&["CONFIG_PATH"]).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or fails validation.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: ReplayConfig = Figment::from(Serialized::defaults(ReplayConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-positive speed, an empty status port, an
    /// empty renaming target or a whitelist entry that is not a valid
    /// regular expression.
    pub fn validate(&self) -> Result<()> {
        if !(self.playback.speed.is_finite() && self.playback.speed > 0.0) {
            return Err(ReplayError::Configuration(format!(
                "playback speed must be positive, got {}",
                self.playback.speed
            )));
        }

        if self.lifecycle.status_port.is_empty() {
            return Err(ReplayError::Configuration(
                "lifecycle status port must not be empty".to_string(),
            ));
        }

        if let Some((from, _)) = self.renamings.iter().find(|(_, to)| to.is_empty()) {
            return Err(ReplayError::Configuration(format!(
                "renaming for task {} has an empty target",
                from
            )));
        }

        for entry in &self.whitelist {
            regex::Regex::new(entry).map_err(|e| {
                ReplayError::Configuration(format!("invalid whitelist pattern {:?}: {}", entry, e))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ReplayConfig::default();
        assert_eq!(config.playback.speed, 1.0);
        assert!(!config.playback.loop_playback);
        assert_eq!(config.lifecycle.status_port, "state");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ReplayConfig::new()
            .with_files(["a.log", "b.log"])
            .with_prefix("sim/")
            .with_whitelist(["trajectory_.*"])
            .with_renaming("trajectory_follower", "follower")
            .with_speed(2.5)
            .with_loop(true);

        assert_eq!(config.files.len(), 2);
        assert_eq!(config.prefix, "sim/");
        assert_eq!(config.renamings["trajectory_follower"], "follower");
        assert_eq!(config.playback.speed, 2.5);
        assert!(config.playback.loop_playback);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        assert!(ReplayConfig::new().with_speed(0.0).validate().is_err());
        assert!(ReplayConfig::new().with_speed(-1.0).validate().is_err());
        assert!(ReplayConfig::new().with_speed(f64::NAN).validate().is_err());
        assert!(ReplayConfig::new().with_whitelist(["("]).validate().is_err());
        assert!(ReplayConfig::new().with_renaming("a", "").validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        writeln!(
            file,
            r#"
files = ["logs/trajectory_follower_Logger.0.log"]
prefix = "replay/"
whitelist = ["trajectory_follower"]

[renamings]
trajectory_follower = "follower"

[playback]
speed = 4.0
loop_playback = true
"#
        )
        .unwrap();

        let config = ReplayConfig::from_file(file.path()).expect("Failed to load config");
        assert_eq!(config.files.len(), 1);
        assert_eq!(config.prefix, "replay/");
        assert_eq!(config.renamings["trajectory_follower"], "follower");
        assert_eq!(config.playback.speed, 4.0);
        assert!(config.playback.loop_playback);
        // untouched sections keep their defaults
        assert_eq!(config.lifecycle.status_port, "state");
    }

    #[test]
    fn test_from_file_reports_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[playback]\nspeed = \"fast\"").unwrap();

        let result = ReplayConfig::from_file(file.path());
        assert!(matches!(result, Err(ReplayError::Configuration(_))));
    }

    #[test]
    fn test_from_file_rejects_invalid_speed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[playback]\nspeed = -2.0").unwrap();

        let result = ReplayConfig::from_file(file.path());
        assert!(matches!(result, Err(ReplayError::Configuration(_))));
    }
}
