//! Configuration management
//!
//! Loaded from a TOML file. Every limit the orchestrator enforces lives here so
//! that deployments (and tests) can shrink them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Free space required before a recording may start (2.6 GB)
pub const DEFAULT_MIN_FREE_BYTES: u64 = 2_600_000_000;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub recording: RecordingConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the durable temporary area and of the shared store file
    pub data_dir: PathBuf,

    /// Where finished artifacts and exported logs are copied for the user
    pub downloads_dir: PathBuf,

    /// Minimum free bytes on the data volume to allow a start
    #[serde(default = "default_min_free_bytes")]
    pub min_free_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            downloads_dir: default_downloads_dir(),
            min_free_bytes: DEFAULT_MIN_FREE_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Purpose tag prepended to every artifact name
    pub file_prefix: String,

    /// Recorder timeslice
    pub chunk_interval_ms: u64,

    /// Hard limit on a single recording
    pub max_duration_secs: u64,

    /// Backstop delay before orphaned temporary files are deleted
    pub cleanup_delay_minutes: f64,

    pub screen_mime: String,

    pub camera_mime: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            file_prefix: "proctoring".to_string(),
            chunk_interval_ms: 5_000,
            max_duration_secs: 4 * 60 * 60,
            cleanup_delay_minutes: 245.0,
            screen_mime: r#"video/mp4; codecs="avc1.64001E, opus""#.to_string(),
            camera_mime: r#"video/mp4; codecs="avc1.64001E""#.to_string(),
        }
    }
}

impl RecordingConfig {
    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms.max(1))
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    /// Reset a cleanup delay that is negative, not finite, or beyond what
    /// a timer can hold back to the default.
    pub fn validate(&mut self) {
        let minutes = self.cleanup_delay_minutes;
        let representable = minutes >= 0.0
            && Duration::try_from_secs_f64(minutes * 60.0)
                .ok()
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .and_then(|d| chrono::Utc::now().checked_add_signed(d))
                .is_some();
        if !representable {
            let fallback = RecordingConfig::default().cleanup_delay_minutes;
            tracing::warn!(
                "Invalid cleanup_delay_minutes {}, using {}",
                minutes,
                fallback
            );
            self.cleanup_delay_minutes = fallback;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the session service; `None` runs fully offline
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Activity log entries older than this are pruned when the panel opens
    pub retention_hours: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { retention_hours: 24 }
    }
}

impl LoggingConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }
}

fn default_min_free_bytes() -> u64 {
    DEFAULT_MIN_FREE_BYTES
}

fn default_timeout_secs() -> u64 {
    60
}

impl Config {
    /// Load configuration from disk, falling back to defaults
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(mut config) => {
                        config.recording.validate();
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config {:?}: {}", path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config file {:?}: {}", path, e);
                }
            }
        }

        Self::default()
    }

    /// Save configuration to disk
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Whether a session service is configured
    pub fn server_connection(&self) -> bool {
        self.server.base_url.is_some()
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("proctor-recorder")
}

fn default_downloads_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
}
