//! Wires the gateway components together.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::conversation::{ConversationFactory, WindowConversationFactory};
use crate::error::Result;
use crate::playback::{FrameScheduler, SpeechOutput, StoryPlayer};
use crate::router::{GatewayServices, MessageRouter, PairingGuard, RouterParts};
use crate::session::SessionManager;
use crate::tools::ToolGlobalRegistry;
use crate::tools::builtin::{ChangeRoleTool, ExitSessionTool, PlayMusicTool, PlayStoryTool};
use crate::transport;

/// A fully assembled gateway.
pub struct Gateway {
    config: GatewayConfig,
    router: MessageRouter,
    tools: Arc<ToolGlobalRegistry>,
}

impl Gateway {
    /// Build every component from `config` around the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`crate::GatewayError::Config`] if the configuration is invalid.
    pub fn new(config: GatewayConfig, services: GatewayServices) -> Result<Self> {
        config.validate()?;
        let services = Arc::new(services);
        let sessions = Arc::new(SessionManager::new());
        let scheduler = Arc::new(FrameScheduler::new(Duration::from_millis(
            config.playback.frame_duration_ms,
        )));
        let speech = Arc::new(SpeechOutput::new(
            Arc::clone(&services.tts),
            Arc::clone(&services.encoder),
            Arc::clone(&scheduler),
        ));
        let stories = Arc::new(StoryPlayer::new(
            &config.story,
            config.playback.audio_dir.clone(),
            Arc::clone(&services.encoder),
            Arc::clone(&scheduler),
        )?);
        let conversations: Arc<dyn ConversationFactory> =
            Arc::new(WindowConversationFactory::new(config.memory.max_messages));

        let mut registry = ToolGlobalRegistry::new();
        registry.register(Arc::new(ExitSessionTool));
        registry.register(Arc::new(ChangeRoleTool::new(
            Arc::clone(&services.devices),
            Arc::clone(&conversations),
        )));
        registry.register(Arc::new(PlayMusicTool::new(Arc::clone(&services.music))));
        registry.register(Arc::new(PlayStoryTool::new(stories)));
        let tools = Arc::new(registry);
        tracing::info!(tools = ?tools.names(), "tool registry ready");

        let router = MessageRouter::new(RouterParts {
            sessions,
            services,
            tools: Arc::clone(&tools),
            conversations,
            scheduler,
            speech,
            pairing: Arc::new(PairingGuard::new(Duration::from_millis(
                config.pairing.cooldown_ms,
            ))),
        });

        Ok(Self {
            config,
            router,
            tools,
        })
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn tools(&self) -> &Arc<ToolGlobalRegistry> {
        &self.tools
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run the inactivity sweep and the device endpoint until `shutdown`.
    ///
    /// Sessions still open when the listener stops are torn down before
    /// this returns.
    pub async fn serve(&self, shutdown: CancellationToken) -> Result<()> {
        let monitor = self.router.spawn_inactivity_monitor(
            Duration::from_secs(self.config.session.check_interval_secs),
            Duration::from_secs(self.config.session.inactivity_timeout_secs),
            shutdown.clone(),
        );
        let result =
            transport::ws::serve(&self.config.server, self.router.clone(), shutdown.clone()).await;
        shutdown.cancel();
        let _ = monitor.await;

        for session_id in self.router.sessions().session_ids() {
            self.router.on_close(&session_id);
        }
        result
    }
}
