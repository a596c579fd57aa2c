//! The live-conversation aggregate.
//!
//! A [`ChatSession`] is created when a device connects and owned by the
//! [`SessionManager`] until it closes. Close is terminal: the lifetime token
//! is cancelled, outstanding device requests are cancelled and every later
//! send fails.

pub mod correlator;
pub mod manager;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Local};
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::conversation::Conversation;
use crate::directory::{Device, Role};
use crate::error::{GatewayError, Result};
use crate::protocol::{IotDescriptor, ListenMode, ServerMessage};
use crate::tools::ToolSessionView;
use crate::transport::SessionTransport;

pub use correlator::{PendingRequestCorrelator, ResponseSlot};
pub use manager::{SessionEvent, SessionManager};

/// Inbound audio handed to the dialogue pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioChunk {
    Frame(Bytes),
    /// The device stopped listening; flush what was buffered.
    End,
}

/// The bound device and its conversation, read and swapped together so a
/// role switch is never observed half done.
#[derive(Debug, Clone, Default)]
pub struct Binding {
    pub device: Option<Device>,
    pub conversation: Option<Arc<Conversation>>,
}

/// One live device conversation.
pub struct ChatSession {
    session_id: String,
    transport: Arc<dyn SessionTransport>,
    binding: RwLock<Binding>,
    roles: RwLock<Vec<Role>>,
    iot_descriptors: DashMap<String, IotDescriptor>,
    tools: RwLock<Option<Arc<ToolSessionView>>>,
    pending: PendingRequestCorrelator,
    close_after_chat: AtomicBool,
    music_playing: AtomicBool,
    playing: AtomicBool,
    streaming: AtomicBool,
    closed: AtomicBool,
    listen_mode: Mutex<ListenMode>,
    user_time: Mutex<Option<DateTime<Local>>>,
    assistant_time: Mutex<Option<DateTime<Local>>>,
    playback_elapsed_ms: AtomicU64,
    attributes: DashMap<String, Value>,
    audio_stream: Mutex<Option<mpsc::UnboundedSender<AudioChunk>>>,
    last_activity: Mutex<Instant>,
    lifetime: CancellationToken,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("session_id", &self.session_id)
            .field("device_id", &self.device_id())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    pub fn new(session_id: impl Into<String>, transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            session_id: session_id.into(),
            transport,
            binding: RwLock::new(Binding::default()),
            roles: RwLock::new(Vec::new()),
            iot_descriptors: DashMap::new(),
            tools: RwLock::new(None),
            pending: PendingRequestCorrelator::new(),
            close_after_chat: AtomicBool::new(false),
            music_playing: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            listen_mode: Mutex::new(ListenMode::default()),
            user_time: Mutex::new(None),
            assistant_time: Mutex::new(None),
            playback_elapsed_ms: AtomicU64::new(0),
            attributes: DashMap::new(),
            audio_stream: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            lifetime: CancellationToken::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    // --- transport ---

    pub fn is_open(&self) -> bool {
        !self.is_closed() && self.transport.is_open()
    }

    pub fn is_audio_channel_open(&self) -> bool {
        !self.is_closed() && self.transport.is_audio_channel_open()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Cancelled when the session closes. Work tied to the session should
    /// select on this or derive a child token from it.
    pub fn lifetime(&self) -> &CancellationToken {
        &self.lifetime
    }

    /// Close the session. Only the first call has any effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.lifetime.cancel();
        let cancelled = self.pending.cancel_all();
        if cancelled > 0 {
            tracing::debug!(
                session_id = %self.session_id,
                cancelled,
                "cancelled pending device requests"
            );
        }
        self.close_audio_stream();
        self.transport.close();
    }

    pub fn send_text(&self, payload: String) -> Result<()> {
        self.ensure_open()?;
        self.transport.send_text(payload)
    }

    pub fn send_binary(&self, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.transport.send_binary(payload)
    }

    pub fn send_message(&self, message: &ServerMessage) -> Result<()> {
        self.send_text(message.to_json()?)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(GatewayError::Session(format!(
                "session {} is closed",
                self.session_id
            )));
        }
        Ok(())
    }

    // --- device and role binding ---

    fn read_binding(&self) -> std::sync::RwLockReadGuard<'_, Binding> {
        self.binding.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_binding(&self) -> std::sync::RwLockWriteGuard<'_, Binding> {
        self.binding.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consistent snapshot of the device and conversation.
    pub fn binding(&self) -> Binding {
        self.read_binding().clone()
    }

    pub fn device(&self) -> Option<Device> {
        self.read_binding().device.clone()
    }

    pub fn set_device(&self, device: Device) {
        self.write_binding().device = Some(device);
    }

    pub fn device_id(&self) -> Option<String> {
        self.read_binding()
            .device
            .as_ref()
            .map(|d| d.device_id.clone())
    }

    pub fn role_id(&self) -> Option<i64> {
        self.read_binding().device.as_ref().and_then(|d| d.role_id)
    }

    /// Replace the device and conversation under one guard. The previous
    /// conversation is cleared before the guard is released.
    pub fn rebind(&self, device: Device, conversation: Arc<Conversation>) {
        let mut binding = self.write_binding();
        binding.device = Some(device);
        if let Some(previous) = binding.conversation.replace(conversation) {
            previous.clear();
        }
    }

    pub fn roles(&self) -> Vec<Role> {
        self.roles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_roles(&self, roles: Vec<Role>) {
        *self.roles.write().unwrap_or_else(PoisonError::into_inner) = roles;
    }

    // --- conversation ---

    pub fn conversation(&self) -> Option<Arc<Conversation>> {
        self.read_binding().conversation.clone()
    }

    /// Attach `conversation`, clearing whichever one it replaces.
    pub fn set_conversation(&self, conversation: Arc<Conversation>) {
        if let Some(previous) = self.write_binding().conversation.replace(conversation) {
            previous.clear();
        }
    }

    /// Detach and clear the current conversation.
    pub fn clear_conversation(&self) -> bool {
        let previous = self.write_binding().conversation.take();
        match previous {
            Some(conversation) => {
                conversation.clear();
                true
            }
            None => false,
        }
    }

    // --- IoT descriptors ---

    pub fn put_iot_descriptor(&self, descriptor: IotDescriptor) {
        self.iot_descriptors
            .insert(descriptor.name.clone(), descriptor);
    }

    pub fn iot_descriptor(&self, name: &str) -> Option<IotDescriptor> {
        self.iot_descriptors.get(name).map(|d| d.clone())
    }

    pub fn iot_descriptor_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.iot_descriptors.iter().map(|d| d.key().clone()).collect();
        names.sort_unstable();
        names
    }

    // --- tools and device requests ---

    pub fn tools(&self) -> Option<Arc<ToolSessionView>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_tools(&self, tools: Arc<ToolSessionView>) {
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = Some(tools);
    }

    pub fn pending(&self) -> &PendingRequestCorrelator {
        &self.pending
    }

    /// Send a JSON-RPC request to the device's MCP endpoint.
    ///
    /// The returned slot completes when the device replies with the same id,
    /// or fails with [`GatewayError::Cancelled`] once the session closes.
    pub fn call_device_tool(&self, method: &str, params: Value) -> Result<ResponseSlot> {
        self.ensure_open()?;
        let id = self.pending.next_id();
        let slot = self.pending.issue(id)?;
        let message = ServerMessage::Mcp {
            session_id: self.session_id.clone(),
            payload: json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }),
        };
        if let Err(e) = self.send_message(&message) {
            self.pending.discard(id);
            return Err(e);
        }
        Ok(slot)
    }

    // --- flags ---

    pub fn is_close_after_chat(&self) -> bool {
        self.close_after_chat.load(Ordering::Acquire)
    }

    pub fn set_close_after_chat(&self, value: bool) {
        self.close_after_chat.store(value, Ordering::Release);
    }

    pub fn is_music_playing(&self) -> bool {
        self.music_playing.load(Ordering::Acquire)
    }

    pub fn set_music_playing(&self, value: bool) {
        self.music_playing.store(value, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn set_playing(&self, value: bool) {
        self.playing.store(value, Ordering::Release);
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    pub fn set_streaming(&self, value: bool) {
        self.streaming.store(value, Ordering::Release);
    }

    pub fn listen_mode(&self) -> ListenMode {
        *self.listen_mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_listen_mode(&self, mode: ListenMode) {
        *self.listen_mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    /// Milliseconds of audio delivered by the current playback.
    pub fn playback_elapsed_ms(&self) -> u64 {
        self.playback_elapsed_ms.load(Ordering::Acquire)
    }

    pub fn set_playback_elapsed_ms(&self, value: u64) {
        self.playback_elapsed_ms.store(value, Ordering::Release);
    }

    // --- turn timestamps and audio artifacts ---

    pub fn user_time(&self) -> Option<DateTime<Local>> {
        *self.user_time.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_user_time(&self, at: DateTime<Local>) {
        *self.user_time.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    pub fn assistant_time(&self) -> Option<DateTime<Local>> {
        *self
            .assistant_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_assistant_time(&self, at: DateTime<Local>) {
        *self
            .assistant_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    /// Where the current user utterance is archived, once a turn has started.
    pub fn user_audio_path(&self, root: &Path) -> Option<PathBuf> {
        self.turn_audio_path(root, self.user_time()?, "user")
    }

    pub fn assistant_audio_path(&self, root: &Path) -> Option<PathBuf> {
        self.turn_audio_path(root, self.assistant_time()?, "assistant")
    }

    fn turn_audio_path(&self, root: &Path, at: DateTime<Local>, speaker: &str) -> Option<PathBuf> {
        let device = self.device()?;
        let role_id = device.role_id?;
        let device_dir = device.device_id.replace(':', "-");
        let stamp = at.format("%Y-%m-%dT%H%M%S");
        Some(
            root.join(device_dir)
                .join(role_id.to_string())
                .join(format!("{stamp}-{speaker}.wav")),
        )
    }

    // --- attributes ---

    pub fn set_attribute(&self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes.get(key).map(|v| v.clone())
    }

    pub fn remove_attribute(&self, key: &str) -> Option<Value> {
        self.attributes.remove(key).map(|(_, v)| v)
    }

    // --- activity ---

    pub fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    // --- inbound audio stream ---

    /// Start a new inbound audio stream, replacing any previous one.
    pub fn open_audio_stream(&self) -> mpsc::UnboundedReceiver<AudioChunk> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .audio_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// Forward a frame to the open stream. Returns `false` if none is open.
    pub fn push_audio(&self, frame: Bytes) -> bool {
        let guard = self
            .audio_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .is_some_and(|tx| tx.send(AudioChunk::Frame(frame)).is_ok())
    }

    pub fn has_audio_stream(&self) -> bool {
        self.audio_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Signal end-of-stream to the consumer. The stream stays attached
    /// until [`close_audio_stream`](Self::close_audio_stream).
    pub fn complete_audio_stream(&self) {
        let guard = self
            .audio_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(AudioChunk::End);
        }
    }

    pub fn close_audio_stream(&self) {
        self.audio_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
