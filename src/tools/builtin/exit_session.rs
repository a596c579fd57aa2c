use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::str_arg;
use crate::error::Result;
use crate::session::ChatSession;
use crate::tools::{Tool, ToolResult};

const DEFAULT_GOODBYE: &str = "Goodbye, talk to you soon!";

/// Ends the conversation once the current reply has been spoken.
#[derive(Debug, Default)]
pub struct ExitSessionTool;

#[async_trait]
impl Tool for ExitSessionTool {
    fn name(&self) -> &str {
        "func_exitSession"
    }

    fn description(&self) -> &str {
        "Call when the user wants to end the conversation, says goodbye or asks you to stop talking."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sayGoodbye": {
                    "type": "string",
                    "description": "A short, friendly farewell to speak before closing"
                }
            }
        })
    }

    async fn execute(&self, session: &Arc<ChatSession>, args: Value) -> Result<ToolResult> {
        session.set_close_after_chat(true);
        let goodbye = str_arg(&args, "sayGoodbye").unwrap_or(DEFAULT_GOODBYE);
        tracing::info!(session_id = %session.session_id(), "session will close after this reply");
        Ok(ToolResult::success(goodbye))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::transport::ChannelTransport;

    #[tokio::test]
    async fn marks_session_and_uses_default_goodbye() {
        let (transport, _rx) = ChannelTransport::new();
        let session = Arc::new(ChatSession::new("s1", Arc::new(transport)));
        let reply = ExitSessionTool
            .execute(&session, json!({"sayGoodbye": "  "}))
            .await
            .unwrap();
        assert!(session.is_close_after_chat());
        assert_eq!(reply.into_reply(), DEFAULT_GOODBYE);

        let reply = ExitSessionTool
            .execute(&session, json!({"sayGoodbye": "See you!"}))
            .await
            .unwrap();
        assert_eq!(reply.into_reply(), "See you!");
    }
}
