//! Voice prompts for devices that are not configured yet.
//!
//! A device without a role either gets told to finish role setup (it has a
//! name) or gets a pairing code read out. Rapid frames from the same device
//! must not start overlapping generations, so each device holds a
//! [`PairingPermit`] until a cool-down that starts once its prompt has
//! finished playing.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::MessageRouter;
use crate::directory::Device;
use crate::error::Result;
use crate::session::ChatSession;

const CONFIGURE_ROLE_PROMPT: &str =
    "This device has no role yet. Please finish role setup in the console, then talk to me again.";

/// Per-device "generation in progress" flags.
#[derive(Debug, Default)]
pub struct PairingGuard {
    in_progress: Arc<DashMap<String, ()>>,
    cooldown: Duration,
}

impl PairingGuard {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            in_progress: Arc::new(DashMap::new()),
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Set the flag for `device_id` if it is clear. The flag is cleared when
    /// the returned permit is dropped.
    pub fn try_acquire(&self, device_id: &str) -> Option<PairingPermit> {
        match self.in_progress.entry(device_id.to_owned()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(PairingPermit {
                    flags: Arc::clone(&self.in_progress),
                    device_id: device_id.to_owned(),
                })
            }
        }
    }

    #[cfg(test)]
    fn is_in_progress(&self, device_id: &str) -> bool {
        self.in_progress.contains_key(device_id)
    }
}

/// Holds one device's generation flag.
#[derive(Debug)]
pub struct PairingPermit {
    flags: Arc<DashMap<String, ()>>,
    device_id: String,
}

impl Drop for PairingPermit {
    fn drop(&mut self) {
        self.flags.remove(&self.device_id);
    }
}

impl MessageRouter {
    /// Start the configuration prompt for an unbound device.
    ///
    /// Returns `false` when a prompt for this device is already running or
    /// cooling down.
    pub fn handle_unbound_device(&self, session: &Arc<ChatSession>) -> bool {
        if !session.is_open() {
            return false;
        }
        let Some(device) = session.device() else {
            tracing::warn!(session_id = %session.session_id(), "unbound session has no device");
            return false;
        };
        let Some(permit) = self.pairing.try_acquire(&device.device_id) else {
            tracing::debug!(device_id = %device.device_id, "pairing prompt already in progress");
            return false;
        };

        let router = self.clone();
        let session = Arc::clone(session);
        tokio::spawn(async move {
            let lifetime = session.lifetime().clone();
            let outcome = tokio::select! {
                () = lifetime.cancelled() => Ok(None),
                outcome = router.prompt_unbound_device(&session, &device) => outcome.map(Some),
            };
            match outcome {
                Ok(Some(playback_id)) => {
                    // The cooldown starts once the prompt has been heard.
                    if let Some(done) = router.scheduler.completion(session.session_id(), playback_id) {
                        done.cancelled().await;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    session_id = %session.session_id(),
                    device_id = %device.device_id,
                    error = %e,
                    "unbound device prompt failed"
                ),
            }
            tokio::time::sleep(router.pairing.cooldown()).await;
            drop(permit);
        });
        true
    }

    /// Speak the prompt for `device` and return the scheduled playback id.
    async fn prompt_unbound_device(&self, session: &Arc<ChatSession>, device: &Device) -> Result<u64> {
        if device.has_name() && device.role_id.is_none() {
            return self.speech.speak(session, CONFIGURE_ROLE_PROMPT).await;
        }

        let devices = &self.services.devices;
        let mut code = devices
            .generate_pairing_code(&device.device_id, session.session_id())
            .await?;
        let audio_path = match code.audio_path.clone() {
            Some(path) => path,
            None => {
                let text = format!(
                    "Please add this device in the console using code {}",
                    spell_digits(&code.code)
                );
                let path = self.services.tts.default_service().await?.speak(&text).await?;
                code.audio_path = Some(path.clone());
                devices.update_pairing_code(&code).await?;
                path
            }
        };
        tracing::info!(device_id = %device.device_id, "pairing code announced");
        self.speech.play_file(session, &audio_path, &code.code).await
    }
}

/// `"482913"` → `"4 8 2 9 1 3"` so speech engines read digits one by one.
fn spell_digits(code: &str) -> String {
    code.chars()
        .map(String::from)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permit_release_clears_flag() {
        let guard = PairingGuard::new(Duration::from_millis(10));
        let permit = guard.try_acquire("d1");
        assert!(permit.is_some());
        assert!(guard.try_acquire("d1").is_none());
        assert!(guard.try_acquire("d2").is_some());
        assert!(guard.is_in_progress("d1"));
        drop(permit);
        assert!(!guard.is_in_progress("d1"));
        assert!(guard.try_acquire("d1").is_some());
    }

    #[test]
    fn digits_are_spaced() {
        assert_eq!(spell_digits("4821"), "4 8 2 1");
    }
}
