//! Frame-paced audio delivery.
//!
//! One periodic task per session sends a single frame per frame interval,
//! preceded by any caption that falls on that frame. Starting playback stops
//! whatever was playing for the session; stopping cancels the task, deletes
//! the transient asset and resets the session's playback flags.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{Caption, PlaybackRequest};
use crate::error::{GatewayError, Result};
use crate::protocol::{ServerMessage, TtsState};
use crate::session::ChatSession;

/// State of one session's active playback.
struct ActivePlayback {
    id: u64,
    cancel: CancellationToken,
    cursor: Arc<AtomicUsize>,
    total: usize,
    asset: Option<PathBuf>,
    session: Arc<ChatSession>,
    announce: bool,
}

type PlaybackTable = DashMap<String, ActivePlayback>;

pub struct FrameScheduler {
    frame_interval: Duration,
    active: Arc<PlaybackTable>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("frame_interval", &self.frame_interval)
            .field("active", &self.active.len())
            .finish()
    }
}

impl FrameScheduler {
    /// A zero interval is raised to one millisecond.
    pub fn new(frame_interval: Duration) -> Self {
        Self {
            frame_interval: frame_interval.max(Duration::from_millis(1)),
            active: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Start playing `request` to `session`, replacing any current playback.
    ///
    /// Returns the playback id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Session`] if the session is closed and
    /// [`GatewayError::Playback`] if there are no frames. The transient
    /// asset is deleted in both cases.
    pub fn play(&self, session: &Arc<ChatSession>, request: PlaybackRequest) -> Result<u64> {
        let session_id = session.session_id().to_owned();
        if session.is_closed() {
            remove_asset(request.transient_asset.as_deref(), &session_id);
            return Err(GatewayError::Session(format!(
                "session {session_id} is closed"
            )));
        }
        if request.frames.is_empty() {
            remove_asset(request.transient_asset.as_deref(), &session_id);
            return Err(GatewayError::Playback("nothing to play".to_owned()));
        }

        self.stop(&session_id);

        let interval_ms = duration_millis(self.frame_interval);
        let captions = caption_table(&request.captions, interval_ms);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = session.lifetime().child_token();
        let cursor = Arc::new(AtomicUsize::new(0));
        let playback = ActivePlayback {
            id,
            cancel: cancel.clone(),
            cursor: Arc::clone(&cursor),
            total: request.frames.len(),
            asset: request.transient_asset,
            session: Arc::clone(session),
            announce: request.announce,
        };

        if let Some(raced) = self.active.insert(session_id.clone(), playback) {
            release(raced);
        }
        session.set_playing(true);
        session.set_playback_elapsed_ms(0);
        if request.announce {
            if let Err(e) = session.send_message(&ServerMessage::tts(&session_id, TtsState::Start, None)) {
                tracing::debug!(%session_id, error = %e, "could not announce playback");
            }
        }

        tracing::debug!(%session_id, playback_id = id, frames = request.frames.len(), "playback started");
        tokio::spawn(run_playback(
            Arc::clone(&self.active),
            Arc::clone(session),
            id,
            cancel,
            cursor,
            request.frames,
            captions,
            self.frame_interval,
        ));
        Ok(id)
    }

    /// Stop the session's playback. Returns `false` if nothing was playing.
    pub fn stop(&self, session_id: &str) -> bool {
        match self.active.remove(session_id) {
            Some((_, playback)) => {
                tracing::debug!(%session_id, playback_id = playback.id, "playback stopped");
                release(playback);
                true
            }
            None => false,
        }
    }

    /// Token cancelled once the given playback ends, whether it completed,
    /// was stopped or replaced, or its session closed. `None` if it has
    /// already ended.
    pub fn completion(&self, session_id: &str, playback_id: u64) -> Option<CancellationToken> {
        self.active
            .get(session_id)
            .filter(|p| p.id == playback_id)
            .map(|p| p.cancel.clone())
    }

    pub fn is_playing(&self, session_id: &str) -> bool {
        self.active.contains_key(session_id)
    }

    /// `(frames sent, total frames)` of the current playback.
    pub fn progress(&self, session_id: &str) -> Option<(usize, usize)> {
        self.active
            .get(session_id)
            .map(|p| (p.cursor.load(Ordering::Acquire), p.total))
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// Map frame index to caption text. Captions landing on the same frame are
/// joined with a space.
fn caption_table(captions: &[Caption], interval_ms: u64) -> BTreeMap<usize, String> {
    let mut table: BTreeMap<usize, String> = BTreeMap::new();
    for caption in captions {
        let index = usize::try_from(caption.time_ms / interval_ms).unwrap_or(usize::MAX);
        table
            .entry(index)
            .and_modify(|text| {
                text.push(' ');
                text.push_str(&caption.text);
            })
            .or_insert_with(|| caption.text.clone());
    }
    table
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[allow(clippy::too_many_arguments)]
async fn run_playback(
    active: Arc<PlaybackTable>,
    session: Arc<ChatSession>,
    id: u64,
    cancel: CancellationToken,
    cursor: Arc<AtomicUsize>,
    frames: Vec<Bytes>,
    captions: BTreeMap<usize, String>,
    frame_interval: Duration,
) {
    let session_id = session.session_id().to_owned();
    let interval_ms = duration_millis(frame_interval);
    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if cancel.is_cancelled() || !is_current(&active, &session_id, id) {
            break;
        }

        let index = cursor.load(Ordering::Acquire);
        let Some(frame) = frames.get(index) else {
            break;
        };
        session.touch();
        session.set_playback_elapsed_ms(interval_ms.saturating_mul(index as u64));
        if let Some(text) = captions.get(&index) {
            if let Err(e) = session.send_message(&ServerMessage::caption(&session_id, text.clone())) {
                tracing::debug!(%session_id, error = %e, "caption not delivered");
            }
        }
        if let Err(e) = session.send_binary(frame.clone()) {
            tracing::debug!(%session_id, error = %e, "frame not delivered, ending playback");
            break;
        }
        cursor.store(index + 1, Ordering::Release);
        if index + 1 >= frames.len() {
            break;
        }
    }

    if let Some((_, playback)) = active.remove_if(&session_id, |_, p| p.id == id) {
        tracing::debug!(%session_id, playback_id = id, "playback finished");
        release(playback);
    }
}

fn is_current(active: &PlaybackTable, session_id: &str, id: u64) -> bool {
    active.get(session_id).is_some_and(|p| p.id == id)
}

/// Tear down one playback. Safe to run for a playback that already ended.
fn release(playback: ActivePlayback) {
    playback.cancel.cancel();
    let session = &playback.session;
    remove_asset(playback.asset.as_deref(), session.session_id());
    session.set_playing(false);
    session.set_music_playing(false);
    if playback.announce && !session.is_closed() {
        let stop = ServerMessage::tts(session.session_id(), TtsState::Stop, None);
        if let Err(e) = session.send_message(&stop) {
            tracing::debug!(session_id = %session.session_id(), error = %e, "could not send tts stop");
        }
    }
}

pub(super) fn remove_asset(path: Option<&Path>, session_id: &str) {
    let Some(path) = path else {
        return;
    };
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(%session_id, path = %path.display(), "removed transient asset"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(%session_id, path = %path.display(), error = %e, "failed to remove transient asset");
        }
    }
}
