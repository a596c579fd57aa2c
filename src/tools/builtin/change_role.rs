use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::str_arg;
use crate::conversation::{ConversationFactory, switch_conversation};
use crate::directory::DeviceDirectory;
use crate::error::{GatewayError, Result};
use crate::session::ChatSession;
use crate::tools::{Tool, ToolResult};

/// Switches the device to another of its owner's roles.
///
/// Only offered when the session has at least two roles to pick from.
pub struct ChangeRoleTool {
    devices: Arc<dyn DeviceDirectory>,
    conversations: Arc<dyn ConversationFactory>,
}

impl ChangeRoleTool {
    pub fn new(
        devices: Arc<dyn DeviceDirectory>,
        conversations: Arc<dyn ConversationFactory>,
    ) -> Self {
        Self {
            devices,
            conversations,
        }
    }
}

#[async_trait]
impl Tool for ChangeRoleTool {
    fn name(&self) -> &str {
        "func_changeRole"
    }

    fn description(&self) -> &str {
        "Switch to a different assistant role when the user asks to talk to someone else."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "roleName": {
                    "type": "string",
                    "description": "Name of the role to switch to"
                }
            },
            "required": ["roleName"]
        })
    }

    fn applicable(&self, session: &ChatSession) -> bool {
        session.roles().len() > 1
    }

    async fn execute(&self, session: &Arc<ChatSession>, args: Value) -> Result<ToolResult> {
        let Some(wanted) = str_arg(&args, "roleName") else {
            return Ok(ToolResult::failure("Which role would you like to switch to?"));
        };
        let roles = session.roles();
        let Some(role) = roles
            .iter()
            .find(|r| r.role_name.eq_ignore_ascii_case(wanted))
        else {
            let available: Vec<&str> = roles.iter().map(|r| r.role_name.as_str()).collect();
            return Ok(ToolResult::failure(format!(
                "There is no role called {wanted}. Available roles: {}.",
                available.join(", ")
            )));
        };
        if session.role_id() == Some(role.role_id) {
            return Ok(ToolResult::success(format!("I am already {}.", role.role_name)));
        }

        let device_id = session.device_id().ok_or_else(|| {
            GatewayError::Session(format!("session {} has no device bound", session.session_id()))
        })?;
        self.devices
            .update_device_role(&device_id, role.role_id)
            .await?;
        switch_conversation(session, self.conversations.as_ref(), role)?;
        tracing::info!(
            session_id = %session.session_id(),
            %device_id,
            role_id = role.role_id,
            "role switched"
        );
        Ok(ToolResult::success(format!(
            "Switched to {}. How can I help?",
            role.role_name
        )))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::conversation::WindowConversationFactory;
    use crate::directory::{Device, InMemoryDirectory, Role};
    use crate::transport::ChannelTransport;

    fn role(id: i64, name: &str) -> Role {
        Role {
            role_id: id,
            role_name: name.to_owned(),
            ..Role::default()
        }
    }

    fn setup() -> (ChangeRoleTool, Arc<InMemoryDirectory>, Arc<ChatSession>) {
        let directory = Arc::new(InMemoryDirectory::new());
        let mut device = Device::new("d1");
        device.role_id = Some(1);
        directory.insert_device(device.clone());

        let (transport, _rx) = ChannelTransport::new();
        let session = Arc::new(ChatSession::new("s1", Arc::new(transport)));
        session.set_device(device);
        session.set_roles(vec![role(1, "Teacher"), role(2, "Pirate")]);

        let tool = ChangeRoleTool::new(
            Arc::clone(&directory) as Arc<dyn DeviceDirectory>,
            Arc::new(WindowConversationFactory::default()),
        );
        (tool, directory, session)
    }

    #[tokio::test]
    async fn switches_role_and_conversation() {
        let (tool, directory, session) = setup();
        assert!(tool.applicable(&session));

        let reply = tool
            .execute(&session, json!({"roleName": "pirate"}))
            .await
            .unwrap();
        assert!(reply.success);
        assert_eq!(session.role_id(), Some(2));
        assert_eq!(session.conversation().unwrap().role_id(), 2);
        assert_eq!(directory.device("d1").unwrap().role_id, Some(2));
    }

    #[tokio::test]
    async fn unknown_role_lists_alternatives() {
        let (tool, _directory, session) = setup();
        let reply = tool
            .execute(&session, json!({"roleName": "Wizard"}))
            .await
            .unwrap();
        assert!(!reply.success);
        assert!(reply.into_reply().contains("Teacher, Pirate"));
        assert_eq!(session.role_id(), Some(1));
    }

    #[test]
    fn not_applicable_with_single_role() {
        let (tool, _directory, session) = setup();
        session.set_roles(vec![role(1, "Teacher")]);
        assert!(!tool.applicable(&session));
    }
}
