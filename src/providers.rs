//! Speech and language-model provider contracts.
//!
//! Concrete vendor adapters live outside the gateway. The router only needs
//! to obtain clients (which doubles as cache pre-warming) and the speech
//! output path needs `speak`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::conversation::Turn;
use crate::directory::ProviderConfig;
use crate::error::{GatewayError, Result};
use crate::session::ChatSession;

#[async_trait]
pub trait SpeechToText: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Transcribe one finished utterance of PCM audio.
    async fn recognize(&self, pcm: &[u8]) -> Result<String>;
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Synthesize `text` and return the path of the written audio asset.
    async fn speak(&self, text: &str) -> Result<PathBuf>;
}

#[async_trait]
pub trait SttFactory: Send + Sync {
    /// Fetch (or build and cache) a client. `None` selects the default provider.
    async fn get_service(&self, config: Option<&ProviderConfig>) -> Result<Arc<dyn SpeechToText>>;
}

#[async_trait]
pub trait TtsFactory: Send + Sync {
    /// Fetch (or build and cache) a client for a provider and voice.
    async fn get_service(
        &self,
        config: Option<&ProviderConfig>,
        voice: Option<&str>,
    ) -> Result<Arc<dyn TextToSpeech>>;

    /// Client used for gateway prompts that are not tied to a role.
    async fn default_service(&self) -> Result<Arc<dyn TextToSpeech>> {
        self.get_service(None, None).await
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn chat(&self, system_prompt: &str, turns: &[Turn]) -> Result<String>;
}

#[async_trait]
pub trait ChatModelFactory: Send + Sync {
    /// Resolve the model configured for the session's current role.
    async fn take_chat_model(&self, session: &ChatSession) -> Result<Arc<dyn ChatModel>>;
}

/// Provider factory used when no vendor adapters are wired in.
///
/// Every request fails with [`GatewayError::Provider`], which the router
/// treats as a degraded but usable session.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProviders;

#[async_trait]
impl SttFactory for NoopProviders {
    async fn get_service(&self, _config: Option<&ProviderConfig>) -> Result<Arc<dyn SpeechToText>> {
        Err(GatewayError::Provider("no speech-to-text provider configured".to_owned()))
    }
}

#[async_trait]
impl TtsFactory for NoopProviders {
    async fn get_service(
        &self,
        _config: Option<&ProviderConfig>,
        _voice: Option<&str>,
    ) -> Result<Arc<dyn TextToSpeech>> {
        Err(GatewayError::Provider("no text-to-speech provider configured".to_owned()))
    }
}

#[async_trait]
impl ChatModelFactory for NoopProviders {
    async fn take_chat_model(&self, _session: &ChatSession) -> Result<Arc<dyn ChatModel>> {
        Err(GatewayError::Provider("no chat model configured".to_owned()))
    }
}
