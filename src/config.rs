//! Configuration file parser for ~/.config/gleaner/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! A handful of `GLEANER_*` environment variables override the file, and
//! [`Config::validate`] runs after both have been applied.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::scheduler::SchedulerConfig;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Environment variables that take precedence over the file
pub const ENV_DATABASE: &str = "GLEANER_DATABASE";
pub const ENV_POLL_INTERVAL: &str = "GLEANER_POLL_INTERVAL_SECS";
pub const ENV_BATCH_SIZE: &str = "GLEANER_BATCH_SIZE";

const KNOWN_KEYS: [&str; 8] = [
    "database_path",
    "poll_interval_secs",
    "batch_size",
    "fetch_timeout_secs",
    "worker_timeout_secs",
    "registration_timeout_secs",
    "max_feed_bytes",
    "user_agent",
];

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file. `None` means `~/.config/gleaner/gleaner.db`.
    pub database_path: Option<PathBuf>,

    /// Seconds between the starts of two polling cycles.
    pub poll_interval_secs: u64,

    /// Feeds checked per cycle.
    pub batch_size: u32,

    /// Per-request HTTP timeout.
    pub fetch_timeout_secs: u64,

    /// Budget for one whole feed check (fetch, store, mark).
    pub worker_timeout_secs: u64,

    /// Budget for the validation fetch and first check of a new feed.
    pub registration_timeout_secs: u64,

    /// Largest feed body accepted, in bytes.
    pub max_feed_bytes: usize,

    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            poll_interval_secs: 600,
            batch_size: 10,
            fetch_timeout_secs: 30,
            worker_timeout_secs: 120,
            registration_timeout_secs: 10,
            max_feed_bytes: 10 * 1024 * 1024,
            user_agent: format!("gleaner/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            poll_interval_secs = config.poll_interval_secs,
            batch_size = config.batch_size,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Apply `GLEANER_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get(ENV_DATABASE) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = get(ENV_POLL_INTERVAL) {
            self.poll_interval_secs = parse_number(ENV_POLL_INTERVAL, &raw)?;
        }
        if let Some(raw) = get(ENV_BATCH_SIZE) {
            self.batch_size = parse_number(ENV_BATCH_SIZE, &raw)?;
        }
        Ok(())
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("poll_interval_secs", self.poll_interval_secs == 0),
            ("batch_size", self.batch_size == 0),
            ("fetch_timeout_secs", self.fetch_timeout_secs == 0),
            ("worker_timeout_secs", self.worker_timeout_secs == 0),
            ("registration_timeout_secs", self.registration_timeout_secs == 0),
            ("max_feed_bytes", self.max_feed_bytes == 0),
        ];
        if let Some((key, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::Invalid(format!("{} must be greater than 0", key)));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid("user_agent must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            batch_size: self.batch_size,
            trigger_timeout: self.registration_timeout(),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} is not a valid number: {:?}", key, raw)))
}

// ============================================================================
// Tests
// ============================================================================
