//! Core tool types.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::session::ChatSession;

/// Result of a tool execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    /// Whether the tool execution succeeded.
    pub success: bool,
    /// Output content.
    pub content: String,
    /// Error message if the tool execution failed.
    pub error: Option<String>,
}

impl ToolResult {
    /// Create a successful tool result.
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
        }
    }

    /// Create a failed tool result with an error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: Some(error.into()),
        }
    }

    /// Plain-text form handed back to the model or spoken directly.
    pub fn into_reply(self) -> String {
        if self.success {
            self.content
        } else {
            self.error.unwrap_or_default()
        }
    }
}

/// A named, schema-described capability.
///
/// Tools receive the calling session so they can act on it (flags,
/// playback, device requests) without holding a reference to the registry.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model calls the tool by.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn schema(&self) -> Value;

    /// Whether the reply is spoken as-is instead of going back to the model.
    fn return_direct(&self) -> bool {
        true
    }

    /// Whether the tool makes sense for this session at all.
    fn applicable(&self, _session: &ChatSession) -> bool {
        true
    }

    async fn execute(&self, session: &Arc<ChatSession>, args: Value) -> Result<ToolResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_prefers_content_or_error() {
        assert_eq!(ToolResult::success("done").into_reply(), "done");
        assert_eq!(ToolResult::failure("nope").into_reply(), "nope");
    }
}
