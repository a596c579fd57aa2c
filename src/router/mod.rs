//! Inbound message routing and connection lifecycle.
//!
//! The transport calls [`MessageRouter::on_open`], [`MessageRouter::handle_text_frame`],
//! [`MessageRouter::on_binary_frame`] and [`MessageRouter::on_close`] for each
//! connection, one call at a time. Anything addressed to a session the
//! registry no longer knows is stale and dropped quietly.

pub mod pairing;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::conversation::ConversationFactory;
use crate::dialogue::{AudioSessionCleanup, DialogueController, IotSink, MusicService, VoiceActivity};
use crate::directory::{ConfigDirectory, Device, DeviceDirectory, DeviceState, Role, RoleDirectory};
use crate::error::{GatewayError, Result};
use crate::playback::{FrameEncoder, FrameScheduler, SpeechOutput};
use crate::protocol::{
    AbortMessage, AbortReason, DeviceMcpMessage, DeviceMessage, IotMessage, ListenMessage,
    ListenState, ServerMessage, TtsState,
};
use crate::providers::{ChatModelFactory, SttFactory, TtsFactory};
use crate::session::{ChatSession, SessionManager};
use crate::tools::{ToolGlobalRegistry, ToolSessionView};

pub use pairing::{PairingGuard, PairingPermit};

const ROLE_MISSING_NOTICE: &str =
    "This device's role is not configured. Please finish role setup in the console.";
const INIT_FAILED_NOTICE: &str = "Sorry, I couldn't get ready. Please try again in a moment.";

/// External collaborators the router drives.
pub struct GatewayServices {
    pub devices: Arc<dyn DeviceDirectory>,
    pub roles: Arc<dyn RoleDirectory>,
    pub configs: Arc<dyn ConfigDirectory>,
    pub stt: Arc<dyn SttFactory>,
    pub tts: Arc<dyn TtsFactory>,
    pub chat_models: Arc<dyn ChatModelFactory>,
    pub iot: Arc<dyn IotSink>,
    pub vad: Arc<dyn VoiceActivity>,
    pub audio: Arc<dyn AudioSessionCleanup>,
    pub dialogue: Arc<dyn DialogueController>,
    pub music: Arc<dyn MusicService>,
    pub encoder: Arc<dyn FrameEncoder>,
}

/// Gateway components the router coordinates.
pub struct RouterParts {
    pub sessions: Arc<SessionManager>,
    pub services: Arc<GatewayServices>,
    pub tools: Arc<ToolGlobalRegistry>,
    pub conversations: Arc<dyn ConversationFactory>,
    pub scheduler: Arc<FrameScheduler>,
    pub speech: Arc<SpeechOutput>,
    pub pairing: Arc<PairingGuard>,
}

#[derive(Clone)]
pub struct MessageRouter {
    sessions: Arc<SessionManager>,
    services: Arc<GatewayServices>,
    tools: Arc<ToolGlobalRegistry>,
    conversations: Arc<dyn ConversationFactory>,
    scheduler: Arc<FrameScheduler>,
    speech: Arc<SpeechOutput>,
    pairing: Arc<PairingGuard>,
}

impl MessageRouter {
    pub fn new(parts: RouterParts) -> Self {
        Self {
            sessions: parts.sessions,
            services: parts.services,
            tools: parts.tools,
            conversations: parts.conversations,
            scheduler: parts.scheduler,
            speech: parts.speech,
            pairing: parts.pairing,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn scheduler(&self) -> &Arc<FrameScheduler> {
        &self.scheduler
    }

    // --- connection lifecycle ---

    /// Register a new connection and start initializing it.
    ///
    /// The session and its device binding are in the registry before this
    /// returns; role resolution, provider pre-warming and conversation setup
    /// continue on a task that ends with the session.
    ///
    /// # Errors
    ///
    /// Returns the directory error if the device lookup fails; the device is
    /// told and the connection torn down first.
    pub async fn on_open(&self, session: Arc<ChatSession>, device_id: &str) -> Result<()> {
        let session_id = session.session_id().to_owned();
        self.sessions.register_session(Arc::clone(&session));

        let mut device = match self.services.devices.lookup_device(device_id).await {
            Ok(found) => found.unwrap_or_else(|| Device::new(device_id)),
            Err(e) => {
                tracing::error!(%session_id, %device_id, error = %e, "device lookup failed");
                self.fail_connection(&session, INIT_FAILED_NOTICE);
                return Err(e);
            }
        };
        device.device_id = device_id.to_owned();
        device.session_id = Some(session_id.clone());

        let previous = self.sessions.get_session_by_device_id(device_id);
        if let Some(superseded) = self.sessions.register_device(&session_id, device.clone())? {
            if let Some(previous) = previous.filter(|p| p.session_id() == superseded) {
                self.release_resources(&previous);
            }
        }

        match device.role_id {
            Some(role_id) => {
                let view = Arc::new(ToolSessionView::new(&session_id, Arc::clone(&self.tools)));
                session.set_tools(Arc::clone(&view));
                self.spawn_initialization(session, device, role_id, view);
            }
            None => tracing::info!(%session_id, %device_id, "device connected without a role"),
        }
        Ok(())
    }

    fn spawn_initialization(
        &self,
        session: Arc<ChatSession>,
        device: Device,
        role_id: i64,
        view: Arc<ToolSessionView>,
    ) {
        let router = self.clone();
        tokio::spawn(async move {
            let lifetime = session.lifetime().clone();
            let result = tokio::select! {
                () = lifetime.cancelled() => return,
                result = router.initialize(&session, &device, role_id, &view) => result,
            };
            if let Err(e) = result {
                tracing::error!(
                    session_id = %session.session_id(),
                    device_id = %device.device_id,
                    error = %e,
                    "session initialization failed"
                );
                let notice = match e {
                    GatewayError::Role(_) => ROLE_MISSING_NOTICE,
                    _ => INIT_FAILED_NOTICE,
                };
                router.fail_connection(&session, notice);
            }
        });
    }

    async fn initialize(
        &self,
        session: &Arc<ChatSession>,
        device: &Device,
        role_id: i64,
        view: &ToolSessionView,
    ) -> Result<()> {
        let role = self
            .services
            .roles
            .lookup_role(role_id)
            .await?
            .ok_or_else(|| GatewayError::Role(format!("role {role_id} not found")))?;
        session.set_roles(self.services.roles.list_roles(device.user_id).await?);

        self.prewarm_providers(session, &role).await;
        if role.model_id.is_some() {
            if let Err(e) = self.services.chat_models.take_chat_model(session).await {
                tracing::warn!(session_id = %session.session_id(), error = %e, "chat model unavailable");
            }
        }

        let conversation = self
            .conversations
            .init_conversation(device, &role, session.session_id());
        session.set_conversation(conversation);
        let tools = view.register_global_tools(session);

        self.services
            .devices
            .update_device_state(&device.device_id, DeviceState::Online)
            .await?;
        tracing::info!(
            session_id = %session.session_id(),
            device_id = %device.device_id,
            role = %role.role_name,
            tools,
            "session ready"
        );
        Ok(())
    }

    /// Warm provider client caches. Failures only degrade the session.
    async fn prewarm_providers(&self, session: &ChatSession, role: &Role) {
        let session_id = session.session_id();
        if let Some(stt_id) = role.stt_id {
            match self.services.configs.lookup_config(stt_id).await {
                Ok(Some(config)) => {
                    if let Err(e) = self.services.stt.get_service(Some(&config)).await {
                        tracing::warn!(%session_id, stt_id, error = %e, "speech-to-text pre-warm failed");
                    }
                }
                Ok(None) => tracing::warn!(%session_id, stt_id, "speech-to-text config missing"),
                Err(e) => tracing::warn!(%session_id, stt_id, error = %e, "speech-to-text config lookup failed"),
            }
        }
        if let Some(tts_id) = role.tts_id {
            match self.services.configs.lookup_config(tts_id).await {
                Ok(Some(config)) => {
                    let voice = role.voice_name.as_deref();
                    if let Err(e) = self.services.tts.get_service(Some(&config), voice).await {
                        tracing::warn!(%session_id, tts_id, error = %e, "text-to-speech pre-warm failed");
                    }
                }
                Ok(None) => tracing::warn!(%session_id, tts_id, "text-to-speech config missing"),
                Err(e) => tracing::warn!(%session_id, tts_id, error = %e, "text-to-speech config lookup failed"),
            }
        }
    }

    /// Tell the device why it is being dropped, then tear the session down.
    fn fail_connection(&self, session: &ChatSession, notice: &str) {
        let session_id = session.session_id();
        let messages = [
            ServerMessage::caption(session_id, notice),
            ServerMessage::tts(session_id, TtsState::Stop, None),
        ];
        for message in &messages {
            if let Err(e) = session.send_message(message) {
                tracing::debug!(%session_id, error = %e, "could not deliver failure notice");
                break;
            }
        }
        self.on_close(session_id);
    }

    /// Tear down a connection. Unknown sessions are ignored.
    pub fn on_close(&self, session_id: &str) {
        let Some(session) = self.sessions.get_session(session_id) else {
            tracing::debug!(%session_id, "close for unknown session");
            return;
        };
        let device_id = session.device_id();

        self.sessions.close_session(session_id);
        if let Some(device_id) = device_id {
            // A newer session may already own the device.
            if self.sessions.get_session_by_device_id(&device_id).is_none() {
                let devices = Arc::clone(&self.services.devices);
                let session_id = session_id.to_owned();
                tokio::spawn(async move {
                    match devices.update_device_state(&device_id, DeviceState::Offline).await {
                        Ok(()) => tracing::info!(%session_id, %device_id, "device offline"),
                        Err(e) => tracing::error!(%session_id, %device_id, error = %e, "failed to mark device offline"),
                    }
                });
            }
        }
        self.release_resources(&session);
    }

    fn release_resources(&self, session: &ChatSession) {
        let session_id = session.session_id();
        self.scheduler.stop(session_id);
        self.services.vad.reset_session(session_id);
        self.services.audio.cleanup(session_id);
        self.services.dialogue.cleanup_session(session_id);
        session.clear_conversation();
    }

    /// Close sessions idle for longer than `timeout`, checking every `every`.
    pub fn spawn_inactivity_monitor(
        &self,
        every: Duration,
        timeout: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                for session_id in router.sessions.inactive_sessions(timeout) {
                    tracing::info!(%session_id, idle_secs = timeout.as_secs(), "closing idle session");
                    router.on_close(&session_id);
                }
            }
        })
    }

    // --- inbound frames ---

    /// Handle one inbound binary audio frame.
    pub async fn on_binary_frame(&self, session_id: &str, frame: Bytes) {
        let Some(session) = self.sessions.get_session(session_id) else {
            return;
        };
        if session.role_id().is_none() {
            self.handle_unbound_device(&session);
            return;
        }
        session.touch();
        session.push_audio(frame.clone());
        if let Err(e) = self.services.dialogue.process_audio(&session, frame).await {
            tracing::warn!(%session_id, error = %e, "audio processing failed");
        }
    }

    /// Parse and handle one inbound text frame. Malformed frames are dropped.
    pub async fn handle_text_frame(&self, session_id: &str, text: &str) {
        match DeviceMessage::parse(text) {
            Ok(message) => self.handle_message(session_id, message).await,
            Err(e) => tracing::debug!(%session_id, error = %e, "dropping unparseable message"),
        }
    }

    pub async fn handle_message(&self, session_id: &str, message: DeviceMessage) {
        let Some(session) = self.sessions.get_session(session_id) else {
            tracing::debug!(%session_id, kind = message.kind(), "message for unknown session");
            return;
        };
        session.touch();
        tracing::debug!(%session_id, kind = message.kind(), "message received");

        match message {
            DeviceMessage::Goodbye(_) => self.on_close(session_id),
            DeviceMessage::Mcp(m) => handle_device_mcp(&session, m),
            _ if session.role_id().is_none() => {
                self.handle_unbound_device(&session);
            }
            DeviceMessage::Listen(m) => self.handle_listen(&session, m).await,
            DeviceMessage::Abort(m) => self.handle_abort(&session, m).await,
            DeviceMessage::Iot(m) => self.handle_iot(&session, m),
        }
    }

    async fn handle_listen(&self, session: &Arc<ChatSession>, message: ListenMessage) {
        let session_id = session.session_id();
        if let Some(mode) = message.mode {
            session.set_listen_mode(mode);
        }
        let text = message.text.unwrap_or_default();
        let result = match message.state {
            ListenState::Start => {
                self.services.vad.init_session(session_id);
                Ok(())
            }
            ListenState::Stop => {
                self.sessions.complete_audio_stream(session_id);
                self.sessions.close_audio_stream(session_id);
                self.sessions.set_streaming_state(session_id, false);
                self.services.vad.reset_session(session_id);
                Ok(())
            }
            ListenState::Text => {
                if self.scheduler.is_playing(session_id) || session.is_playing() {
                    tracing::debug!(%session_id, "barge-in stops playback");
                    self.scheduler.stop(session_id);
                    if let Err(e) = self
                        .services
                        .dialogue
                        .abort(session, AbortReason::UserInterrupt)
                        .await
                    {
                        tracing::warn!(%session_id, error = %e, "abort before text failed");
                    }
                }
                if text.trim().is_empty() {
                    Ok(())
                } else {
                    self.services.dialogue.handle_text(session, &text).await
                }
            }
            ListenState::Detect => self.services.dialogue.handle_wake_word(session, &text).await,
        };
        if let Err(e) = result {
            tracing::warn!(%session_id, state = ?message.state, error = %e, "listen handling failed");
        }
    }

    async fn handle_abort(&self, session: &Arc<ChatSession>, message: AbortMessage) {
        let session_id = session.session_id();
        let reason = message.reason();
        self.scheduler.stop(session_id);
        if let Err(e) = self.services.dialogue.abort(session, reason).await {
            tracing::warn!(%session_id, ?reason, error = %e, "abort failed");
        }
    }

    fn handle_iot(&self, session: &ChatSession, message: IotMessage) {
        let session_id = session.session_id();
        if let Some(descriptors) = message.descriptors {
            for descriptor in &descriptors {
                session.put_iot_descriptor(descriptor.clone());
            }
            tracing::info!(%session_id, count = descriptors.len(), "iot descriptors received");
            self.services.iot.on_descriptors(session_id, &descriptors);
        }
        if let Some(states) = message.states {
            self.services.iot.on_states(session_id, &states);
        }
    }
}

fn handle_device_mcp(session: &ChatSession, message: DeviceMcpMessage) {
    let Some(id) = message.request_id() else {
        tracing::debug!(session_id = %session.session_id(), "mcp message without id");
        return;
    };
    if !session.pending().resolve(id, message.payload) {
        tracing::debug!(session_id = %session.session_id(), id, "mcp reply with no pending request");
    }
}
