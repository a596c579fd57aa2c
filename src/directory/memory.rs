//! In-memory directory backed by concurrent maps.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;

use super::{
    ConfigDirectory, Device, DeviceDirectory, DeviceState, PairingCode, ProviderConfig, Role,
    RoleDirectory,
};
use crate::config::DirectorySeed;
use crate::error::{GatewayError, Result};

/// Directory implementation holding every record in memory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    devices: DashMap<String, Device>,
    roles: DashMap<i64, Role>,
    providers: DashMap<i64, ProviderConfig>,
    pairing_codes: DashMap<String, PairingCode>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory pre-populated from configuration.
    pub fn from_seed(seed: &DirectorySeed) -> Self {
        let directory = Self::new();
        for device in &seed.devices {
            directory.insert_device(device.clone());
        }
        for role in &seed.roles {
            directory.insert_role(role.clone());
        }
        for provider in &seed.providers {
            directory.insert_provider(provider.clone());
        }
        directory
    }

    pub fn insert_device(&self, device: Device) {
        self.devices.insert(device.device_id.clone(), device);
    }

    pub fn insert_role(&self, role: Role) {
        self.roles.insert(role.role_id, role);
    }

    pub fn insert_provider(&self, provider: ProviderConfig) {
        self.providers.insert(provider.config_id, provider);
    }

    /// Snapshot of a device record, for inspection.
    pub fn device(&self, device_id: &str) -> Option<Device> {
        self.devices.get(device_id).map(|d| d.clone())
    }

    /// Most recent pairing code issued for a device.
    pub fn pairing_code(&self, device_id: &str) -> Option<PairingCode> {
        self.pairing_codes.get(device_id).map(|c| c.clone())
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDirectory {
    async fn lookup_device(&self, device_id: &str) -> Result<Option<Device>> {
        Ok(self.device(device_id))
    }

    async fn update_device_state(&self, device_id: &str, state: DeviceState) -> Result<()> {
        let mut entry = self
            .devices
            .entry(device_id.to_owned())
            .or_insert_with(|| Device::new(device_id));
        entry.state = state;
        if state == DeviceState::Online {
            entry.last_login = Some(Utc::now());
        }
        tracing::debug!(%device_id, state = state.as_str(), "device state updated");
        Ok(())
    }

    async fn update_device_role(&self, device_id: &str, role_id: i64) -> Result<()> {
        let mut entry = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| GatewayError::Device(format!("unknown device {device_id}")))?;
        entry.role_id = Some(role_id);
        Ok(())
    }

    async fn generate_pairing_code(
        &self,
        device_id: &str,
        session_id: &str,
    ) -> Result<PairingCode> {
        // An outstanding code stays valid, along with its recorded announcement.
        let entry = self
            .pairing_codes
            .entry(device_id.to_owned())
            .or_insert_with(|| PairingCode {
                device_id: device_id.to_owned(),
                session_id: session_id.to_owned(),
                code: format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32)),
                audio_path: None,
            });
        Ok(entry.value().clone())
    }

    async fn update_pairing_code(&self, code: &PairingCode) -> Result<()> {
        self.pairing_codes
            .insert(code.device_id.clone(), code.clone());
        Ok(())
    }
}

#[async_trait]
impl RoleDirectory for InMemoryDirectory {
    async fn lookup_role(&self, role_id: i64) -> Result<Option<Role>> {
        Ok(self.roles.get(&role_id).map(|r| r.clone()))
    }

    async fn list_roles(&self, user_id: Option<i64>) -> Result<Vec<Role>> {
        let mut roles: Vec<Role> = self
            .roles
            .iter()
            .filter(|r| user_id.is_none() || r.user_id.is_none() || r.user_id == user_id)
            .map(|r| r.clone())
            .collect();
        roles.sort_by_key(|r| r.role_id);
        Ok(roles)
    }
}

#[async_trait]
impl ConfigDirectory for InMemoryDirectory {
    async fn lookup_config(&self, config_id: i64) -> Result<Option<ProviderConfig>> {
        Ok(self.providers.get(&config_id).map(|p| p.clone()))
    }
}
