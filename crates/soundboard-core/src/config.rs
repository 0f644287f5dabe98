//! Application configuration management.
//!
//! Handles loading, saving and validating the settings that sit next to the
//! catalog: where the catalog lives, playback defaults, and the limits of
//! the network collaborators.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result, StorageError};
use crate::logging::LoggingConfig;
use crate::store::write_json_atomic;

/// Largest number of search results a resolver may return.
pub const MAX_SEARCH_LIMIT: usize = 50;

/// Playback defaults applied to a new session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Initial volume, 0 to 100.
    pub volume: u8,
    /// Start the next track when one finishes.
    pub auto_advance: bool,
    /// Shuffle the queue.
    pub shuffle: bool,
    /// Wrap to the start after the last track.
    pub loop_playlist: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            volume: 70,
            auto_advance: true,
            shuffle: false,
            loop_playlist: true,
        }
    }
}

/// Track resolver settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResolverConfig {
    /// Results returned by a search.
    pub search_limit: usize,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            search_limit: 15,
            request_timeout_secs: 30,
        }
    }
}

/// Playlist import settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ImportConfig {
    /// Most tracks taken from one external playlist.
    pub max_tracks: usize,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_tracks: 50,
            request_timeout_secs: 10,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Catalog document path.
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    /// Playback defaults.
    #[serde(default)]
    pub playback: PlaybackConfig,
    /// Resolver settings.
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Import settings.
    #[serde(default)]
    pub import: ImportConfig,
    /// Log levels, rotation and directory.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            playback: PlaybackConfig::default(),
            resolver: ResolverConfig::default(),
            import: ImportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the platform config directory, creating it
    /// with defaults if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = config_file_path();
        if !path.exists() {
            debug!("Config file not found, using defaults");
            let config = Self::default();
            if let Err(e) = config.save_to(&path) {
                warn!("Failed to save default config: {}", e);
            }
            return Ok(config);
        }
        Self::load_from(&path)
    }

    /// Load configuration from `path`. Out-of-range values are clamped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| StorageError::ReadFailed {
            path: path.to_path_buf(),
            reason: format!("Failed to read config file: {e}"),
        })?;

        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;
        config.validate();

        info!("Loaded config from {}", path.display());
        debug!("Catalog document: {}", config.data_file.display());
        Ok(config)
    }

    /// Save configuration to the platform config directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Clamp out-of-range values into their valid ranges.
    pub fn validate(&mut self) {
        if self.playback.volume > 100 {
            warn!("Volume {} out of range, clamping to 100", self.playback.volume);
            self.playback.volume = 100;
        }

        let limit = self.resolver.search_limit.clamp(1, MAX_SEARCH_LIMIT);
        if limit != self.resolver.search_limit {
            warn!(
                "Search limit {} out of range, using {}",
                self.resolver.search_limit, limit
            );
            self.resolver.search_limit = limit;
        }

        if self.import.max_tracks == 0 {
            warn!("Import track limit of 0 disables imports, using default");
            self.import.max_tracks = ImportConfig::default().max_tracks;
        }

        self.resolver.request_timeout_secs = self.resolver.request_timeout_secs.max(1);
        self.import.request_timeout_secs = self.import.request_timeout_secs.max(1);
    }

    /// Path of the platform config file.
    #[must_use]
    pub fn config_file_path() -> PathBuf {
        config_file_path()
    }
}

/// Default catalog document location.
#[must_use]
pub fn default_data_file() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("soundboard")
        .join("soundboard_data.json")
}

fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("soundboard")
        .join("config.json")
}
