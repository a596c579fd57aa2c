//! Remote story playback.
//!
//! A story page at `{base_url}{number}.html` embeds its narration in an
//! HTML `<source src=…>` element. The narration is downloaded next to other
//! session audio, encoded, and handed to the scheduler as a transient asset
//! so it is deleted when playback ends.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use url::Url;

use super::scheduler::remove_asset;
use super::{Caption, FrameEncoder, FrameScheduler, PlaybackRequest};
use crate::config::StoryConfig;
use crate::error::{GatewayError, Result};
use crate::protocol::{ServerMessage, TtsState};
use crate::session::ChatSession;

static SOURCE_SRC: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"<source\s+[^>]*src\s*=\s*["']([^"']+)["'][^>]*>"#).ok()
});

/// First `<source src>` in an HTML page.
pub fn extract_audio_src(html: &str) -> Option<String> {
    let re = SOURCE_SRC.as_ref()?;
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_owned())
        .filter(|s| !s.is_empty())
}

/// A downloaded story file. Deleted on drop unless ownership passes to a
/// playback through [`DownloadedAsset::into_path`], so a cancelled fetch
/// leaves nothing behind.
#[derive(Debug)]
struct DownloadedAsset {
    path: PathBuf,
    session_id: String,
    kept: bool,
}

impl DownloadedAsset {
    fn path(&self) -> &Path {
        &self.path
    }

    fn into_path(mut self) -> PathBuf {
        self.kept = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for DownloadedAsset {
    fn drop(&mut self) {
        if !self.kept {
            remove_asset(Some(&self.path), &self.session_id);
        }
    }
}

pub struct StoryPlayer {
    client: reqwest::Client,
    base_url: Url,
    audio_dir: PathBuf,
    encoder: Arc<dyn FrameEncoder>,
    scheduler: Arc<FrameScheduler>,
}

impl std::fmt::Debug for StoryPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoryPlayer")
            .field("base_url", &self.base_url.as_str())
            .field("audio_dir", &self.audio_dir)
            .finish_non_exhaustive()
    }
}

impl StoryPlayer {
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] for an unparseable base URL or if the
    /// HTTP client cannot be built.
    pub fn new(
        config: &StoryConfig,
        audio_dir: impl Into<PathBuf>,
        encoder: Arc<dyn FrameEncoder>,
        scheduler: Arc<FrameScheduler>,
    ) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| GatewayError::Config(format!("invalid story.base_url {base:?}: {e}")))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build story client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            audio_dir: audio_dir.into(),
            encoder,
            scheduler,
        })
    }

    pub fn page_url(&self, number: u32) -> Result<Url> {
        self.base_url
            .join(&format!("{number}.html"))
            .map_err(|e| GatewayError::Playback(format!("bad story url: {e}")))
    }

    /// Start playing story `number` in the background.
    ///
    /// The fetch is tied to the session's lifetime. On failure the device is
    /// told the story is unavailable and the music flag is cleared.
    pub fn play_story(self: &Arc<Self>, session: &Arc<ChatSession>, number: u32) {
        session.set_music_playing(true);
        let player = Arc::clone(self);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            let lifetime = session.lifetime().clone();
            let outcome = tokio::select! {
                () = lifetime.cancelled() => return,
                outcome = player.fetch_and_play(&session, number) => outcome,
            };
            if let Err(e) = outcome {
                tracing::warn!(session_id = %session.session_id(), number, error = %e, "story playback failed");
                player.report_failure(&session, number);
            }
        });
    }

    /// Fetch, download, encode and schedule one story. Returns the playback id.
    pub async fn fetch_and_play(&self, session: &Arc<ChatSession>, number: u32) -> Result<u64> {
        let page_url = self.page_url(number)?;
        let html = self
            .client
            .get(page_url.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| GatewayError::Playback(format!("story page fetch failed: {e}")))?
            .text()
            .await
            .map_err(|e| GatewayError::Playback(format!("story page read failed: {e}")))?;

        let src = extract_audio_src(&html).ok_or_else(|| {
            GatewayError::Playback(format!("no audio source on {page_url}"))
        })?;
        let asset_url = page_url
            .join(&src)
            .map_err(|e| GatewayError::Playback(format!("bad audio source {src:?}: {e}")))?;

        let asset = self.download(session.session_id(), &asset_url).await?;
        let frames = self.encoder.encode_file(asset.path()).await?;
        tracing::info!(session_id = %session.session_id(), number, frames = frames.len(), "story ready");
        let id = self.scheduler.play(
            session,
            PlaybackRequest {
                frames,
                captions: vec![Caption::new(0, format!("Story {number}"))],
                transient_asset: Some(asset.into_path()),
                announce: true,
            },
        )?;
        // Replacing the previous playback cleared the flag.
        session.set_music_playing(true);
        Ok(id)
    }

    async fn download(&self, session_id: &str, url: &Url) -> Result<DownloadedAsset> {
        let body = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| GatewayError::Playback(format!("story audio fetch failed: {e}")))?
            .bytes()
            .await
            .map_err(|e| GatewayError::Playback(format!("story audio read failed: {e}")))?;

        tokio::fs::create_dir_all(&self.audio_dir).await?;
        let asset = DownloadedAsset {
            path: self
                .audio_dir
                .join(format!("story_{session_id}_{}.mp3", uuid::Uuid::new_v4())),
            session_id: session_id.to_owned(),
            kept: false,
        };
        tokio::fs::write(asset.path(), &body).await?;
        Ok(asset)
    }

    fn report_failure(&self, session: &ChatSession, number: u32) {
        session.set_music_playing(false);
        let session_id = session.session_id();
        let messages = [
            ServerMessage::caption(session_id, format!("Sorry, story {number} is not available right now.")),
            ServerMessage::tts(session_id, TtsState::Stop, None),
        ];
        for message in &messages {
            if let Err(e) = session.send_message(message) {
                tracing::debug!(%session_id, error = %e, "could not report story failure");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::playback::ChunkedFileEncoder;
    use bytes::Bytes;
    use crate::transport::{ChannelTransport, OutboundFrame};
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn player(server: &MockServer, audio_dir: &Path) -> Arc<StoryPlayer> {
        let config = StoryConfig {
            base_url: format!("{}/huiben", server.uri()),
            ..StoryConfig::default()
        };
        Arc::new(
            StoryPlayer::new(
                &config,
                audio_dir,
                Arc::new(ChunkedFileEncoder::new(2)),
                Arc::new(FrameScheduler::new(Duration::from_millis(5))),
            )
            .unwrap(),
        )
    }

    fn session() -> (Arc<ChatSession>, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (transport, rx) = ChannelTransport::new();
        (Arc::new(ChatSession::new("s1", Arc::new(transport))), rx)
    }

    #[test]
    fn extracts_first_source() {
        let html = r#"<audio controls><source type="audio/mpeg" src='/media/12.mp3'></audio>
                      <source src="/media/other.mp3">"#;
        assert_eq!(extract_audio_src(html).as_deref(), Some("/media/12.mp3"));
        assert_eq!(extract_audio_src("<p>no audio</p>"), None);
    }

    #[tokio::test]
    async fn page_url_appends_number() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let player = player(&server, dir.path());
        assert_eq!(
            player.page_url(42).unwrap().as_str(),
            format!("{}/huiben/42.html", server.uri())
        );
    }

    #[tokio::test]
    async fn downloads_and_schedules_story() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/huiben/12.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><audio><source src="/media/12.mp3" type="audio/mpeg"></audio></html>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media/12.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4, 5]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let player = player(&server, dir.path());
        let (session, mut rx) = session();

        player.fetch_and_play(&session, 12).await.unwrap();

        let mut binary = 0;
        let mut saw_stop = false;
        while !saw_stop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(OutboundFrame::Binary(_))) => binary += 1,
                Ok(Some(OutboundFrame::Text(t))) => saw_stop = t.contains("\"stop\""),
                other => panic!("unexpected outbound frame: {other:?}"),
            }
        }
        assert_eq!(binary, 3);
        // Transient asset is deleted once playback ends.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn page_without_source_reports_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/huiben/7.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let player = player(&server, dir.path());
        let (session, mut rx) = session();

        player.play_story(&session, 7);
        assert!(session.is_music_playing());

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let OutboundFrame::Text(text) = first else {
            panic!("expected caption");
        };
        assert!(text.contains("story 7"));
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(second, OutboundFrame::Text(t) if t.contains("\"stop\"")));
        assert!(!session.is_music_playing());
    }

    /// Encoder that takes long enough for the session to close mid-encode.
    struct SlowEncoder;

    #[async_trait::async_trait]
    impl FrameEncoder for SlowEncoder {
        async fn encode_file(&self, _path: &Path) -> Result<Vec<Bytes>> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(vec![Bytes::from_static(b"x")])
        }
    }

    fn files_in(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn closing_mid_encode_removes_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/huiben/30.html"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"<source src="/media/30.mp3">"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media/30.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; 16]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = StoryConfig {
            base_url: format!("{}/huiben", server.uri()),
            ..StoryConfig::default()
        };
        let player = Arc::new(
            StoryPlayer::new(
                &config,
                dir.path(),
                Arc::new(SlowEncoder),
                Arc::new(FrameScheduler::new(Duration::from_millis(5))),
            )
            .unwrap(),
        );
        let (session, _rx) = session();

        player.play_story(&session, 30);
        let mut downloaded = false;
        for _ in 0..200 {
            if files_in(dir.path()) == 1 {
                downloaded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(downloaded, "story was never downloaded");

        // Let the write finish so the close lands inside the encode.
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.close();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(files_in(dir.path()), 0);
    }

    #[tokio::test]
    async fn missing_page_is_playback_error() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let player = player(&server, dir.path());
        let (session, _rx) = session();
        let result = player.fetch_and_play(&session, 404).await;
        assert!(matches!(result, Err(GatewayError::Playback(_))));
    }
}
