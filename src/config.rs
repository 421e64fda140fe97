//! Configurable parameters for the synchronization engine (§6).
//!
//! Mirrors the desktop application's layered `Setting` struct, scaled down to
//! the knobs the core engine itself reads. Loaded from an optional TOML file;
//! any field absent from the file falls back to its default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Listen port advertised by a coordinator.
    pub default_port: u16,
    /// Chunk size in bytes used when streaming files (256 KiB..=4 MiB).
    pub chunk_size_bytes: u64,
    /// How often the sender samples the clipboard adapter.
    pub clipboard_check_interval_ms: u64,
    /// Minimum spacing between processed clipboard changes.
    pub min_process_interval_ms: u64,
    /// Loop-suppression window applied after a remote write.
    pub update_delay_ms: u64,
    /// Files larger than this require an explicit `FILE_REQUEST` rather than
    /// being auto-streamed.
    pub max_file_size_auto: u64,
    /// Substrings identifying this implementation's own temp directory, used
    /// by the arbiter's temp-path heuristic.
    pub temp_path_indicators: Vec<String>,
    /// Maximum size of a decoded wire frame.
    pub max_frame_bytes: u64,
}

pub const MIN_CHUNK_SIZE_BYTES: u64 = 256 * 1024;
pub const MAX_CHUNK_SIZE_BYTES: u64 = 4 * 1024 * 1024;

impl Default for Config {
    fn default() -> Self {
        Self {
            default_port: 8765,
            chunk_size_bytes: 1024 * 1024,
            clipboard_check_interval_ms: 300,
            min_process_interval_ms: 500,
            update_delay_ms: 750,
            max_file_size_auto: 100 * 1024 * 1024,
            temp_path_indicators: vec!["unipaste_files".to_string(), ".clipshare".to_string()],
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from `path`, falling back to defaults for every
    /// field a missing or partial file doesn't specify. A missing file is not
    /// an error; a malformed one is.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size_bytes < MIN_CHUNK_SIZE_BYTES || self.chunk_size_bytes > MAX_CHUNK_SIZE_BYTES
        {
            return Err(ConfigError::Invalid(format!(
                "chunk_size_bytes must be between {} and {}, got {}",
                MIN_CHUNK_SIZE_BYTES, MAX_CHUNK_SIZE_BYTES, self.chunk_size_bytes
            )));
        }
        Ok(())
    }

    pub fn clipboard_check_interval(&self) -> Duration {
        Duration::from_millis(self.clipboard_check_interval_ms)
    }

    pub fn min_process_interval(&self) -> Duration {
        Duration::from_millis(self.min_process_interval_ms)
    }

    pub fn update_delay(&self) -> Duration {
        Duration::from_millis(self.update_delay_ms)
    }
}
