use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{Value, json};

use crate::error::Result;
use crate::playback::StoryPlayer;
use crate::session::ChatSession;
use crate::tools::{Tool, ToolResult};

/// Story numbers available at the remote source.
pub const STORY_RANGE: RangeInclusive<u32> = 5..=1100;

/// Requested story number, or a random one when absent or out of range.
pub fn pick_story(requested: Option<i64>) -> u32 {
    requested
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| STORY_RANGE.contains(n))
        .unwrap_or_else(|| rand::thread_rng().gen_range(STORY_RANGE))
}

pub struct PlayStoryTool {
    stories: Arc<StoryPlayer>,
}

impl PlayStoryTool {
    pub fn new(stories: Arc<StoryPlayer>) -> Self {
        Self { stories }
    }
}

#[async_trait]
impl Tool for PlayStoryTool {
    fn name(&self) -> &str {
        "func_playStory"
    }

    fn description(&self) -> &str {
        "Play a children's picture-book story. Use when the user asks for a story; pick any number if none is given."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "num": {
                    "type": "integer",
                    "description": "Story number between 5 and 1100"
                }
            }
        })
    }

    async fn execute(&self, session: &Arc<ChatSession>, args: Value) -> Result<ToolResult> {
        let number = pick_story(args.get("num").and_then(Value::as_i64));
        self.stories.play_story(session, number);
        Ok(ToolResult::success(format!("Playing story number {number}.")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_range_numbers_are_kept() {
        assert_eq!(pick_story(Some(5)), 5);
        assert_eq!(pick_story(Some(1100)), 1100);
    }

    #[test]
    fn out_of_range_numbers_are_replaced() {
        for requested in [None, Some(0), Some(4), Some(1101), Some(-3)] {
            assert!(STORY_RANGE.contains(&pick_story(requested)));
        }
    }
}
