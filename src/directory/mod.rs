//! Device, role and provider directories.
//!
//! Persistence lives outside the gateway; the core only sees these narrow
//! async traits. [`memory::InMemoryDirectory`] implements all of them for the
//! stand-alone binary and for tests.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use memory::InMemoryDirectory;

/// Connection state recorded for a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    #[default]
    Offline,
    Online,
}

impl DeviceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
        }
    }
}

/// A device record as known to the directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Device {
    pub device_id: String,
    /// Session currently bound to this device, if any.
    pub session_id: Option<String>,
    pub device_name: Option<String>,
    /// Bound role. `None` means the device still needs configuring.
    pub role_id: Option<i64>,
    pub user_id: Option<i64>,
    /// Comma-separated tool allow-list. Empty or `None` loads every applicable tool.
    pub function_names: Option<String>,
    pub state: DeviceState,
    pub last_login: Option<DateTime<Utc>>,
}

impl Device {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    /// Whether the device has been named in the console.
    pub fn has_name(&self) -> bool {
        self.device_name
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty())
    }

    /// Tool names from the allow-list, or `None` when every tool is allowed.
    pub fn allowed_tools(&self) -> Option<Vec<String>> {
        let raw = self.function_names.as_deref()?;
        let names: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_owned)
            .collect();
        if names.is_empty() { None } else { Some(names) }
    }
}

/// A persona a device can talk to, with its provider selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Role {
    pub role_id: i64,
    pub role_name: String,
    /// System prompt for the language model.
    pub role_desc: String,
    pub user_id: Option<i64>,
    pub stt_id: Option<i64>,
    pub tts_id: Option<i64>,
    pub model_id: Option<i64>,
    pub voice_name: Option<String>,
}

/// Credentials and endpoint for one speech or model provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub config_id: i64,
    /// Provider family, e.g. `aliyun` or `openai`.
    pub provider: String,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub model_name: Option<String>,
}

/// A freshly generated pairing code for an unconfigured device.
#[derive(Debug, Clone, PartialEq)]
pub struct PairingCode {
    pub device_id: String,
    pub session_id: String,
    pub code: String,
    /// Synthesized announcement, once generated.
    pub audio_path: Option<std::path::PathBuf>,
}

#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn lookup_device(&self, device_id: &str) -> Result<Option<Device>>;

    async fn update_device_state(&self, device_id: &str, state: DeviceState) -> Result<()>;

    async fn update_device_role(&self, device_id: &str, role_id: i64) -> Result<()>;

    /// Pairing code for a device that has not been bound yet. An outstanding
    /// code is returned as is, so a code already read out stays valid.
    async fn generate_pairing_code(&self, device_id: &str, session_id: &str)
    -> Result<PairingCode>;

    /// Persist the announcement path of a generated code.
    async fn update_pairing_code(&self, code: &PairingCode) -> Result<()>;
}

#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn lookup_role(&self, role_id: i64) -> Result<Option<Role>>;

    /// Roles selectable by the given owner.
    async fn list_roles(&self, user_id: Option<i64>) -> Result<Vec<Role>>;
}

#[async_trait]
pub trait ConfigDirectory: Send + Sync {
    async fn lookup_config(&self, config_id: i64) -> Result<Option<ProviderConfig>>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn blank_name_does_not_count() {
        let mut device = Device::new("aa:bb");
        assert!(!device.has_name());
        device.device_name = Some("  ".to_owned());
        assert!(!device.has_name());
        device.device_name = Some("kitchen".to_owned());
        assert!(device.has_name());
    }

    #[test]
    fn state_names_match_wire_form() {
        for state in [DeviceState::Online, DeviceState::Offline] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
    }

    #[test]
    fn allow_list_splits_and_trims() {
        let mut device = Device::new("aa:bb");
        assert_eq!(device.allowed_tools(), None);
        device.function_names = Some(" func_exitSession , ,func_playMusic".to_owned());
        assert_eq!(
            device.allowed_tools(),
            Some(vec![
                "func_exitSession".to_owned(),
                "func_playMusic".to_owned()
            ])
        );
        device.function_names = Some(" , ".to_owned());
        assert_eq!(device.allowed_tools(), None);
    }
}
