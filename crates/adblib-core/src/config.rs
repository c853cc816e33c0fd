//! Session configuration
//!
//! [`AdbSessionConfig`] is plain data loaded from an optional TOML file. The
//! `ANDROID_ADB_SERVER_PORT` environment variable overrides the port the same
//! way it does for the `adb` command line tool.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::prelude::*;

/// Default port of the ADB server
pub const DEFAULT_ADB_SERVER_PORT: u16 = 5037;

/// Environment variable overriding [`AdbSessionConfig::port`]
pub const ADB_SERVER_PORT_ENV_VAR: &str = "ANDROID_ADB_SERVER_PORT";

const CONFIG_FILENAME: &str = "config.toml";

/// Connection and buffering settings for an `AdbSession`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AdbSessionConfig {
    /// Host the ADB server listens on
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Timeout for opening a socket to the server
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Delay before the device tracker reconnects after losing its connection
    #[serde(default = "default_retry_delay_ms")]
    pub track_devices_retry_delay_ms: u64,

    /// Read chunk size used by shell collectors
    #[serde(default = "default_shell_buffer_size")]
    pub shell_buffer_size: usize,

    /// Default DATA chunk size for sync transfers (capped at 64 KiB)
    #[serde(default = "default_sync_buffer_size")]
    pub sync_buffer_size: usize,

    /// Use `host:track-devices-l` (with product/model/device fields)
    #[serde(default = "default_true")]
    pub tracker_long_format: bool,
}

impl Default for AdbSessionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            track_devices_retry_delay_ms: default_retry_delay_ms(),
            shell_buffer_size: default_shell_buffer_size(),
            sync_buffer_size: default_sync_buffer_size(),
            tracker_long_format: true,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_ADB_SERVER_PORT
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_retry_delay_ms() -> u64 {
    2_000
}

fn default_shell_buffer_size() -> usize {
    8 * 1024
}

fn default_sync_buffer_size() -> usize {
    64 * 1024
}

fn default_true() -> bool {
    true
}

impl AdbSessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn track_devices_retry_delay(&self) -> Duration {
        Duration::from_millis(self.track_devices_retry_delay_ms)
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.track_devices_retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Apply `ANDROID_ADB_SERVER_PORT` if it is set to a valid port
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(raw) = std::env::var(ADB_SERVER_PORT_ENV_VAR) {
            match raw.trim().parse::<u16>() {
                Ok(port) if port > 0 => self.port = port,
                _ => warn!("Ignoring invalid {}={:?}", ADB_SERVER_PORT_ENV_VAR, raw),
            }
        }
        self
    }

    /// `host:port` address of the ADB server
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Default location of the config file (`~/.config/adblib/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("adblib").join(CONFIG_FILENAME))
}

/// Load configuration from `path`, falling back to defaults
///
/// A missing or unparsable file is not an error: the defaults are used and a
/// warning is logged. Environment overrides are applied in every case.
pub fn load_config(path: &Path) -> AdbSessionConfig {
    if !path.exists() {
        debug!("No config file at {:?}, using defaults", path);
        return AdbSessionConfig::default().with_env_overrides();
    }

    let config = match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                debug!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", path, e);
                AdbSessionConfig::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            AdbSessionConfig::default()
        }
    };

    config.with_env_overrides()
}

/// Save configuration to `path`, creating parent directories
///
/// Writes to a temp file first and renames it into place.
pub fn save_config(path: &Path, config: &AdbSessionConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::config(format!("Failed to create {:?}: {}", parent, e)))?;
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)
        .map_err(|e| Error::config(format!("Failed to write temp file: {}", e)))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| Error::config(format!("Failed to rename temp file: {}", e)))?;

    info!("Saved config to {:?}", path);
    Ok(())
}
