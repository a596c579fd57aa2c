//! Collaborators that own the dialogue turn, voice activity and IoT state.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashSet;
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::protocol::{AbortReason, IotDescriptor};
use crate::session::ChatSession;

/// Per-session voice-activity detector state.
pub trait VoiceActivity: Send + Sync {
    fn init_session(&self, session_id: &str);

    fn reset_session(&self, session_id: &str);

    fn is_active(&self, session_id: &str) -> bool;
}

/// Tracks which sessions have detector state without doing any signal work.
#[derive(Debug, Default)]
pub struct TrackingVoiceActivity {
    active: DashSet<String>,
}

impl TrackingVoiceActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

impl VoiceActivity for TrackingVoiceActivity {
    fn init_session(&self, session_id: &str) {
        self.active.insert(session_id.to_owned());
    }

    fn reset_session(&self, session_id: &str) {
        self.active.remove(session_id);
    }

    fn is_active(&self, session_id: &str) -> bool {
        self.active.contains(session_id)
    }
}

/// Releases decoder buffers held for a session's inbound audio.
pub trait AudioSessionCleanup: Send + Sync {
    fn cleanup(&self, session_id: &str);
}

/// Drives one user/assistant turn: recognition, model call, synthesis.
#[async_trait]
pub trait DialogueController: Send + Sync {
    async fn process_audio(&self, session: &Arc<ChatSession>, frame: Bytes) -> Result<()>;

    async fn handle_text(&self, session: &Arc<ChatSession>, text: &str) -> Result<()>;

    async fn handle_wake_word(&self, session: &Arc<ChatSession>, text: &str) -> Result<()>;

    async fn abort(&self, session: &Arc<ChatSession>, reason: AbortReason) -> Result<()>;

    fn cleanup_session(&self, session_id: &str);
}

/// Receives IoT capability descriptors and state reports.
pub trait IotSink: Send + Sync {
    fn on_descriptors(&self, session_id: &str, descriptors: &[IotDescriptor]);

    fn on_states(&self, session_id: &str, states: &Value);
}

/// Resolves and plays a song by name.
#[async_trait]
pub trait MusicService: Send + Sync {
    /// Start playback and return the line spoken back to the user.
    async fn play_music(&self, session: &Arc<ChatSession>, song_name: &str) -> Result<String>;
}

/// Accepts every call and does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDialogue;

impl AudioSessionCleanup for NoopDialogue {
    fn cleanup(&self, _session_id: &str) {}
}

#[async_trait]
impl DialogueController for NoopDialogue {
    async fn process_audio(&self, _session: &Arc<ChatSession>, _frame: Bytes) -> Result<()> {
        Ok(())
    }

    async fn handle_text(&self, _session: &Arc<ChatSession>, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn handle_wake_word(&self, _session: &Arc<ChatSession>, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn abort(&self, _session: &Arc<ChatSession>, _reason: AbortReason) -> Result<()> {
        Ok(())
    }

    fn cleanup_session(&self, _session_id: &str) {}
}

impl IotSink for NoopDialogue {
    fn on_descriptors(&self, _session_id: &str, _descriptors: &[IotDescriptor]) {}

    fn on_states(&self, _session_id: &str, _states: &Value) {}
}

#[async_trait]
impl MusicService for NoopDialogue {
    async fn play_music(&self, _session: &Arc<ChatSession>, song_name: &str) -> Result<String> {
        Err(GatewayError::Playback(format!(
            "music playback unavailable for {song_name:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_vad_follows_init_and_reset() {
        let vad = TrackingVoiceActivity::new();
        assert!(!vad.is_active("s1"));
        vad.init_session("s1");
        vad.init_session("s1");
        assert!(vad.is_active("s1"));
        assert_eq!(vad.active_count(), 1);
        vad.reset_session("s1");
        vad.reset_session("s1");
        assert!(!vad.is_active("s1"));
    }
}
