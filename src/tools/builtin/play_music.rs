use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::str_arg;
use crate::dialogue::MusicService;
use crate::error::Result;
use crate::session::ChatSession;
use crate::tools::{Tool, ToolResult};

pub struct PlayMusicTool {
    music: Arc<dyn MusicService>,
}

impl PlayMusicTool {
    pub fn new(music: Arc<dyn MusicService>) -> Self {
        Self { music }
    }
}

#[async_trait]
impl Tool for PlayMusicTool {
    fn name(&self) -> &str {
        "func_playMusic"
    }

    fn description(&self) -> &str {
        "Play a song when the user asks for music. Pass the song title as given by the user."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "songName": {
                    "type": "string",
                    "description": "Title of the song to play"
                }
            },
            "required": ["songName"]
        })
    }

    async fn execute(&self, session: &Arc<ChatSession>, args: Value) -> Result<ToolResult> {
        let Some(song) = str_arg(&args, "songName") else {
            return Ok(ToolResult::failure("Which song would you like to hear?"));
        };
        match self.music.play_music(session, song).await {
            Ok(reply) => Ok(ToolResult::success(reply)),
            Err(e) => {
                tracing::warn!(session_id = %session.session_id(), song, error = %e, "music playback failed");
                Ok(ToolResult::failure(format!("Sorry, I couldn't play {song} right now.")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::dialogue::NoopDialogue;
    use crate::transport::ChannelTransport;

    #[tokio::test]
    async fn provider_failure_becomes_spoken_apology() {
        let (transport, _rx) = ChannelTransport::new();
        let session = Arc::new(ChatSession::new("s1", Arc::new(transport)));
        let tool = PlayMusicTool::new(Arc::new(NoopDialogue));

        let reply = tool
            .execute(&session, json!({"songName": "Yellow"}))
            .await
            .unwrap();
        assert!(!reply.success);
        assert!(reply.into_reply().contains("Yellow"));

        let missing = tool.execute(&session, json!({})).await.unwrap();
        assert!(!missing.success);
    }
}
