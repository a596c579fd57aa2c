//! Windowed conversation memory.
//!
//! A [`Conversation`] is bound to one (device, role, session) triple and
//! keeps at most `max_messages` turns, evicting the oldest first.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::directory::{Device, Role};
use crate::error::{GatewayError, Result};
use crate::session::ChatSession;

/// Default window capacity.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

/// One role-tagged message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }
}

/// Bounded turn history for the current role of a session.
#[derive(Debug)]
pub struct Conversation {
    device_id: String,
    role_id: i64,
    session_id: String,
    system_prompt: String,
    max_messages: usize,
    turns: Mutex<VecDeque<Turn>>,
}

impl Conversation {
    /// Create an empty window. A zero capacity is raised to one so the
    /// newest turn is always retained.
    pub fn new(
        device_id: impl Into<String>,
        role_id: i64,
        session_id: impl Into<String>,
        system_prompt: impl Into<String>,
        max_messages: usize,
    ) -> Self {
        let max_messages = max_messages.max(1);
        Self {
            device_id: device_id.into(),
            role_id,
            session_id: session_id.into(),
            system_prompt: system_prompt.into(),
            max_messages,
            turns: Mutex::new(VecDeque::with_capacity(max_messages)),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn role_id(&self) -> i64 {
        self.role_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn capacity(&self) -> usize {
        self.max_messages
    }

    /// Append a turn, evicting from the front once the window is full.
    pub fn add(&self, turn: Turn) {
        let mut turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
        while turns.len() >= self.max_messages {
            turns.pop_front();
        }
        turns.push_back(turn);
    }

    /// Snapshot of retained turns, oldest first.
    pub fn messages(&self) -> Vec<Turn> {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Builds conversations for newly bound roles.
pub trait ConversationFactory: Send + Sync {
    fn init_conversation(&self, device: &Device, role: &Role, session_id: &str) -> Arc<Conversation>;
}

/// Factory producing fixed-size windows.
#[derive(Debug, Clone, Copy)]
pub struct WindowConversationFactory {
    max_messages: usize,
}

impl WindowConversationFactory {
    pub fn new(max_messages: usize) -> Self {
        Self { max_messages }
    }
}

impl Default for WindowConversationFactory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl ConversationFactory for WindowConversationFactory {
    fn init_conversation(&self, device: &Device, role: &Role, session_id: &str) -> Arc<Conversation> {
        Arc::new(Conversation::new(
            device.device_id.clone(),
            role.role_id,
            session_id,
            role.role_desc.clone(),
            self.max_messages,
        ))
    }
}

/// Rebind a session to `role`.
///
/// The session's role id is updated and its conversation replaced by a
/// fresh window; the previous window is cleared before this returns.
///
/// # Errors
///
/// Returns [`GatewayError::Session`] if the session has no device bound.
pub fn switch_conversation(
    session: &ChatSession,
    factory: &dyn ConversationFactory,
    role: &Role,
) -> Result<Arc<Conversation>> {
    let mut device = session.device().ok_or_else(|| {
        GatewayError::Session(format!("session {} has no device bound", session.session_id()))
    })?;
    device.role_id = Some(role.role_id);
    let conversation = factory.init_conversation(&device, role, session.session_id());
    session.rebind(device, Arc::clone(&conversation));
    Ok(conversation)
}
