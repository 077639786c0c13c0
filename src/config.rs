//! Configuration file parser for ~/.config/nowfeed/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as a warning, since they
//! are most likely typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite cache location. `None` = `nowfeed.db` in the config directory.
    pub database_path: Option<PathBuf>,

    /// Search reports "not ready" while fewer entities than this are indexed.
    pub min_search_index_count: i64,

    /// Queries shorter than this many characters report "empty query".
    pub min_search_query_length: usize,

    /// Number of recent search queries kept and shown.
    pub recent_search_limit: usize,

    /// How long a shared stream keeps its upstream alive after the last observer leaves.
    pub share_grace_ms: u64,

    /// How often the system time zone is re-read for change detection.
    pub timezone_poll_interval_ms: u64,

    /// Whether analytics events are written to the log. Disabled = no-op helper.
    pub analytics_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            min_search_index_count: 1,
            min_search_query_length: 2,
            recent_search_limit: 10,
            share_grace_ms: 5_000,
            timezone_poll_interval_ms: 1_000,
            analytics_enabled: true,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "database_path",
        "min_search_index_count",
        "min_search_query_length",
        "recent_search_limit",
        "share_grace_ms",
        "timezone_poll_interval_ms",
        "analytics_enabled",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Zero limits or intervals → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to avoid slurping a huge file
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
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content).inspect(|config| {
            tracing::info!(
                path = %path.display(),
                recent_limit = config.recent_search_limit,
                "Loaded configuration"
            );
        })
    }

    /// Parse configuration from TOML text. Blank text yields the defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        // Parse as a raw table first to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.recent_search_limit == 0 {
            return Err(ConfigError::Invalid(
                "recent_search_limit must be at least 1".to_string(),
            ));
        }
        if self.timezone_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "timezone_poll_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn share_grace(&self) -> Duration {
        Duration::from_millis(self.share_grace_ms)
    }

    pub fn timezone_poll_interval(&self) -> Duration {
        Duration::from_millis(self.timezone_poll_interval_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================
