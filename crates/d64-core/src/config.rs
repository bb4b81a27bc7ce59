//! Tool configuration, loaded from TOML.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::channel::ReadPolicy;

/// Configuration for a device session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial number of the device to use when several are attached.
    pub serial: Option<String>,
    /// Zero-byte read attempts before the device counts as frozen.
    pub busy_retries: u32,
    /// Minimum duration of one read attempt in milliseconds.
    pub busy_backoff_ms: u64,
    /// Upgrade status poll interval in milliseconds.
    pub upgrade_poll_ms: u64,
    /// Capacity of the upload pipe in chunks.
    pub pipe_depth: usize,
    /// TOML ROM database used for save-type autodetection.
    pub rom_db: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: None,
            busy_retries: 4,
            busy_backoff_ms: 5,
            upgrade_poll_ms: 100,
            pipe_depth: 2,
            rom_db: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn read_policy(&self) -> ReadPolicy {
        ReadPolicy {
            attempts: self.busy_retries.max(1),
            backoff: Duration::from_millis(self.busy_backoff_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.upgrade_poll_ms)
    }
}
