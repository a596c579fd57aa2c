//! Outbound audio: frame encoding, paced delivery and spoken prompts.

pub mod scheduler;
pub mod story;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{GatewayError, Result};
use crate::providers::TtsFactory;
use crate::session::ChatSession;

pub use scheduler::FrameScheduler;
pub use story::StoryPlayer;

/// Turns an audio asset into device-ready frames.
#[async_trait]
pub trait FrameEncoder: Send + Sync {
    async fn encode_file(&self, path: &Path) -> Result<Vec<Bytes>>;
}

/// Splits an already-encoded file into fixed-size frames.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedFileEncoder {
    frame_bytes: usize,
}

impl ChunkedFileEncoder {
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            frame_bytes: frame_bytes.max(1),
        }
    }
}

impl Default for ChunkedFileEncoder {
    fn default() -> Self {
        // One 60 ms frame of 16 kHz mono 16-bit PCM.
        Self::new(1920)
    }
}

#[async_trait]
impl FrameEncoder for ChunkedFileEncoder {
    async fn encode_file(&self, path: &Path) -> Result<Vec<Bytes>> {
        let data = Bytes::from(tokio::fs::read(path).await?);
        let frames = (0..data.len())
            .step_by(self.frame_bytes)
            .map(|start| data.slice(start..(start + self.frame_bytes).min(data.len())))
            .collect();
        Ok(frames)
    }
}

/// Text shown to the device once playback reaches `time_ms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    pub time_ms: u64,
    pub text: String,
}

impl Caption {
    pub fn new(time_ms: u64, text: impl Into<String>) -> Self {
        Self {
            time_ms,
            text: text.into(),
        }
    }
}

/// Everything the scheduler needs to play one clip.
#[derive(Debug, Clone, Default)]
pub struct PlaybackRequest {
    pub frames: Vec<Bytes>,
    pub captions: Vec<Caption>,
    /// Downloaded file deleted once playback ends.
    pub transient_asset: Option<PathBuf>,
    /// Bracket playback with `tts start` / `tts stop`.
    pub announce: bool,
}

/// Speaks gateway prompts through the default TTS provider.
pub struct SpeechOutput {
    tts: Arc<dyn TtsFactory>,
    encoder: Arc<dyn FrameEncoder>,
    scheduler: Arc<FrameScheduler>,
}

impl SpeechOutput {
    pub fn new(
        tts: Arc<dyn TtsFactory>,
        encoder: Arc<dyn FrameEncoder>,
        scheduler: Arc<FrameScheduler>,
    ) -> Self {
        Self {
            tts,
            encoder,
            scheduler,
        }
    }

    /// Synthesize `text` with the default voice and play it to the session.
    ///
    /// # Errors
    ///
    /// Returns a provider error if synthesis fails, or a playback error if
    /// the asset cannot be encoded or scheduled.
    pub async fn speak(&self, session: &Arc<ChatSession>, text: &str) -> Result<u64> {
        let path = self.tts.default_service().await?.speak(text).await?;
        self.play_file(session, &path, text).await
    }

    /// Play an existing asset with `caption` shown from the first frame.
    ///
    /// Returns the scheduler's playback id.
    pub async fn play_file(
        &self,
        session: &Arc<ChatSession>,
        path: &Path,
        caption: &str,
    ) -> Result<u64> {
        let frames = self.encoder.encode_file(path).await?;
        if frames.is_empty() {
            return Err(GatewayError::Playback(format!(
                "{} produced no frames",
                path.display()
            )));
        }
        self.scheduler.play(
            session,
            PlaybackRequest {
                frames,
                captions: vec![Caption::new(0, caption)],
                transient_asset: None,
                announce: true,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[tokio::test]
    async fn chunked_encoder_splits_with_short_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.opus");
        std::fs::write(&path, vec![7u8; 10]).unwrap();

        let frames = ChunkedFileEncoder::new(4).encode_file(&path).await.unwrap();
        let sizes: Vec<usize> = frames.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn chunked_encoder_missing_file_is_io_error() {
        let result = ChunkedFileEncoder::default()
            .encode_file(Path::new("/nonexistent/clip.opus"))
            .await;
        assert!(matches!(result, Err(GatewayError::Io(_))));
    }
}
