//! Process-wide registry of live sessions and device bindings.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::ChatSession;
use crate::directory::Device;
use crate::error::{GatewayError, Result};

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Registry changes, for observers such as metrics or admin views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Registered {
        session_id: String,
    },
    DeviceBound {
        session_id: String,
        device_id: String,
        /// Session that held the binding before this one.
        superseded: Option<String>,
    },
    Closed {
        session_id: String,
        device_id: Option<String>,
    },
}

/// Maps `session id → session` and `device id → session id`.
///
/// Every method is safe to call concurrently from connection handlers,
/// background initialization and playback tasks.
#[derive(Debug)]
pub struct SessionManager {
    sessions: DashMap<String, Arc<ChatSession>>,
    device_sessions: DashMap<String, String>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for SessionManager {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sessions: DashMap::new(),
            device_sessions: DashMap::new(),
            events,
        }
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn register_session(&self, session: Arc<ChatSession>) {
        let session_id = session.session_id().to_owned();
        self.sessions.insert(session_id.clone(), session);
        tracing::debug!(%session_id, "session registered");
        self.emit(SessionEvent::Registered { session_id });
    }

    /// Bind `device` to a registered session.
    ///
    /// A previous session for the same device is closed and its id returned.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Session`] if `session_id` is not registered.
    pub fn register_device(&self, session_id: &str, device: Device) -> Result<Option<String>> {
        let session = self
            .get_session(session_id)
            .ok_or_else(|| GatewayError::Session(format!("unknown session {session_id}")))?;
        let device_id = device.device_id.clone();
        session.set_device(device);

        let previous = self
            .device_sessions
            .insert(device_id.clone(), session_id.to_owned())
            .filter(|prev| prev != session_id);
        if let Some(prev) = &previous {
            tracing::info!(%device_id, superseded = %prev, %session_id, "device rebound to new session");
            self.close_session(prev);
        }
        self.emit(SessionEvent::DeviceBound {
            session_id: session_id.to_owned(),
            device_id,
            superseded: previous.clone(),
        });
        Ok(previous)
    }

    pub fn get_session(&self, session_id: &str) -> Option<Arc<ChatSession>> {
        self.sessions.get(session_id).map(|s| Arc::clone(s.value()))
    }

    pub fn get_device_config(&self, session_id: &str) -> Option<Device> {
        self.get_session(session_id)?.device()
    }

    pub fn get_session_by_device_id(&self, device_id: &str) -> Option<Arc<ChatSession>> {
        let session_id = self.device_sessions.get(device_id)?.clone();
        self.get_session(&session_id)
    }

    /// Close a session and drop every registry entry for it.
    ///
    /// Returns `false` if the session was already gone.
    pub fn close_session(&self, session_id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return false;
        };
        session.close();
        let device_id = session.device_id();
        if let Some(device_id) = &device_id {
            self.device_sessions
                .remove_if(device_id, |_, bound| bound == session_id);
        }
        tracing::debug!(%session_id, ?device_id, "session closed");
        self.emit(SessionEvent::Closed {
            session_id: session_id.to_owned(),
            device_id,
        });
        true
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.key().clone()).collect()
    }

    /// Sessions idle for longer than `timeout`.
    pub fn inactive_sessions(&self, timeout: Duration) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|s| s.idle_for() > timeout)
            .map(|s| s.key().clone())
            .collect()
    }

    fn with_session(&self, session_id: &str, f: impl FnOnce(&ChatSession)) -> bool {
        match self.get_session(session_id) {
            Some(session) => {
                f(&session);
                true
            }
            None => false,
        }
    }

    pub fn set_music_playing(&self, session_id: &str, value: bool) -> bool {
        self.with_session(session_id, |s| s.set_music_playing(value))
    }

    pub fn set_close_after_chat(&self, session_id: &str, value: bool) -> bool {
        self.with_session(session_id, |s| s.set_close_after_chat(value))
    }

    pub fn set_streaming_state(&self, session_id: &str, value: bool) -> bool {
        self.with_session(session_id, |s| s.set_streaming(value))
    }

    pub fn update_last_activity(&self, session_id: &str) -> bool {
        self.with_session(session_id, ChatSession::touch)
    }

    pub fn complete_audio_stream(&self, session_id: &str) -> bool {
        self.with_session(session_id, ChatSession::complete_audio_stream)
    }

    pub fn close_audio_stream(&self, session_id: &str) -> bool {
        self.with_session(session_id, ChatSession::close_audio_stream)
    }
}
