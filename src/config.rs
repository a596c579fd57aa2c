//! Configuration types for the gateway.
//!
//! Every section is `#[serde(default)]`, so a partial TOML file only needs
//! to name the values it overrides.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::directory::{Device, ProviderConfig, Role};
use crate::error::{GatewayError, Result};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener settings.
    pub server: ServerConfig,
    /// Session lifecycle settings.
    pub session: SessionConfig,
    /// Conversation memory settings.
    pub memory: MemoryConfig,
    /// Frame-paced playback settings.
    pub playback: PlaybackConfig,
    /// Unbound-device pairing settings.
    pub pairing: PairingConfig,
    /// Remote story source.
    pub story: StoryConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
    /// Seed data for the in-memory directory.
    pub directory: DirectorySeed,
}

/// WebSocket listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub bind_addr: String,
    /// Route the device endpoint is mounted on.
    pub ws_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8091".to_owned(),
            ws_path: "/ws/v1".to_owned(),
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions idle longer than this are torn down.
    pub inactivity_timeout_secs: u64,
    /// How often the inactivity sweep runs.
    pub check_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 180,
            check_interval_secs: 10,
        }
    }
}

/// Conversation memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Window capacity of each conversation.
    pub max_messages: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_messages: crate::conversation::DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Duration of one encoded frame, in milliseconds.
    pub frame_duration_ms: u64,
    /// Directory for synthesized and downloaded audio.
    pub audio_dir: PathBuf,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            frame_duration_ms: 60,
            audio_dir: PathBuf::from("audio"),
        }
    }
}

/// Pairing-code dedup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// How long the per-device generation flag stays set.
    pub cooldown_ms: u64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self { cooldown_ms: 1000 }
    }
}

/// Remote story source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoryConfig {
    /// Page URL prefix; the story number and `.html` are appended.
    pub base_url: String,
    /// Connect timeout for page and asset fetches.
    pub connect_timeout_secs: u64,
    /// Overall request timeout for page and asset fetches.
    pub request_timeout_secs: u64,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.limaogushi.com/huiben/".to_owned(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Write daily-rolling log files here instead of stderr.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            directory: None,
        }
    }
}

/// Records loaded into the in-memory directory at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySeed {
    pub devices: Vec<Device>,
    pub roles: Vec<Role>,
    pub providers: Vec<ProviderConfig>,
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| GatewayError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| GatewayError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/voxgate/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("voxgate").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("voxgate")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/voxgate-config/config.toml")
        }
    }

    /// Reject values that would stall playback or disable memory.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.playback.frame_duration_ms == 0 {
            return Err(GatewayError::Config(
                "playback.frame_duration_ms must be positive".to_owned(),
            ));
        }
        if self.memory.max_messages == 0 {
            return Err(GatewayError::Config(
                "memory.max_messages must be positive".to_owned(),
            ));
        }
        if self.session.check_interval_secs == 0 {
            return Err(GatewayError::Config(
                "session.check_interval_secs must be positive".to_owned(),
            ));
        }
        if self.server.ws_path.is_empty() || !self.server.ws_path.starts_with('/') {
            return Err(GatewayError::Config(format!(
                "server.ws_path must start with '/': {:?}",
                self.server.ws_path
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.playback.frame_duration_ms, 60);
        assert_eq!(config.pairing.cooldown_ms, 1000);
        assert_eq!(config.memory.max_messages, 10);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [playback]
            frame_duration_ms = 20

            [[directory.devices]]
            device_id = "aa:bb"
            role_id = 3
            "#,
        )
        .expect("parse partial config");
        assert_eq!(config.playback.frame_duration_ms, 20);
        assert_eq!(config.playback.audio_dir, PathBuf::from("audio"));
        assert_eq!(config.server.ws_path, "/ws/v1");
        assert_eq!(config.directory.devices.len(), 1);
        assert_eq!(config.directory.devices[0].role_id, Some(3));
    }

    #[test]
    fn zero_frame_duration_is_rejected() {
        let mut config = GatewayConfig::default();
        config.playback.frame_duration_ms = 0;
        assert!(matches!(config.validate(), Err(GatewayError::Config(_))));
    }

    #[test]
    fn bad_ws_path_is_rejected() {
        let mut config = GatewayConfig::default();
        config.server.ws_path = "ws".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = GatewayConfig::from_file(std::path::Path::new("/nonexistent/voxgate.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let mut config = GatewayConfig::default();
        config.session.inactivity_timeout_secs = 42;
        config.pairing.cooldown_ms = 250;
        config.save_to_file(&path).expect("save");

        let loaded = GatewayConfig::from_file(&path).expect("load");
        assert_eq!(loaded.session.inactivity_timeout_secs, 42);
        assert_eq!(loaded.pairing.cooldown_ms, 250);
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = GatewayConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert!(path_str.contains("voxgate"));
    }
}
