//! Tools every gateway ships with.

mod change_role;
mod exit_session;
mod play_music;
mod play_story;

pub use change_role::ChangeRoleTool;
pub use exit_session::ExitSessionTool;
pub use play_music::PlayMusicTool;
pub use play_story::PlayStoryTool;

use serde_json::Value;

/// Trimmed, non-empty string argument.
fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
