//! Configuration system for huddle.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $HUDDLE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/huddle/config.toml
//!   3. ~/.config/huddle/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HuddleConfig {
    pub endpoint: EndpointConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Rendezvous name. Must be identical across all instances of the
    /// application that wish to discover each other.
    pub name: String,
}

/// Bounds on the blocking points of the channel. Each must stay short so a
/// wedged peer cannot stall directory delivery to the rest of the group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Wait for the identity frame after accepting a connection.
    pub handshake_ms: u64,
    /// Wait for one frame write to complete.
    pub write_ms: u64,
    /// Wait to acquire the write lock.
    pub lock_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for HuddleConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: "huddle".to_string(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_ms: 500,
            write_ms: 1000,
            lock_ms: 1000,
        }
    }
}

impl TimeoutConfig {
    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }

    pub fn lock(&self) -> Duration {
        Duration::from_millis(self.lock_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Filesystem path for a named endpoint.
pub fn socket_path(name: &str) -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
        .join(format!("{name}.sock"))
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("huddle")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl HuddleConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            HuddleConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("HUDDLE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&HuddleConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply HUDDLE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HUDDLE_ENDPOINT__NAME") {
            self.endpoint.name = v;
        }
        if let Ok(v) = std::env::var("HUDDLE_TIMEOUTS__HANDSHAKE_MS") {
            if let Ok(ms) = v.parse() {
                self.timeouts.handshake_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("HUDDLE_TIMEOUTS__WRITE_MS") {
            if let Ok(ms) = v.parse() {
                self.timeouts.write_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("HUDDLE_TIMEOUTS__LOCK_MS") {
            if let Ok(ms) = v.parse() {
                self.timeouts.lock_ms = ms;
            }
        }
    }
}
