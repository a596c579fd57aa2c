//! Per-session tool subset.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Value, json};

use super::registry::ToolGlobalRegistry;
use super::types::{Tool, ToolResult};
use crate::error::{GatewayError, Result};
use crate::session::ChatSession;

/// The tools one session exposes to its language model.
///
/// Filled from the global registry according to the device's allow-list,
/// plus any tools registered explicitly for this session (e.g. ones backed
/// by the device's own MCP endpoint).
pub struct ToolSessionView {
    session_id: String,
    global: Arc<ToolGlobalRegistry>,
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolSessionView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSessionView")
            .field("session_id", &self.session_id)
            .field("tools", &self.all_names())
            .finish()
    }
}

impl ToolSessionView {
    pub fn new(session_id: impl Into<String>, global: Arc<ToolGlobalRegistry>) -> Self {
        Self {
            session_id: session_id.into(),
            global,
            tools: DashMap::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Copy a tool from the global registry. Unknown names are skipped with
    /// a warning.
    pub fn register_from_global(&self, name: &str) -> bool {
        match self.global.resolve(name) {
            Some(tool) => {
                self.tools.insert(name.to_owned(), tool);
                true
            }
            None => {
                tracing::warn!(
                    session_id = %self.session_id,
                    tool = name,
                    "tool not found in global registry"
                );
                false
            }
        }
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_owned(), tool);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| Arc::clone(t.value()))
    }

    /// All tools, sorted by name.
    pub fn all(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = self.tools.iter().map(|t| Arc::clone(t.value())).collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    pub fn all_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|t| t.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Load the global tools this session is entitled to.
    ///
    /// A device allow-list loads exactly the named tools; without one every
    /// tool applicable to the session is loaded.
    pub fn register_global_tools(&self, session: &ChatSession) -> usize {
        match session.device().and_then(|d| d.allowed_tools()) {
            Some(names) => names
                .iter()
                .filter(|name| self.register_from_global(name))
                .count(),
            None => {
                let tools = self.global.all_applicable(session);
                let count = tools.len();
                for tool in tools {
                    self.register(tool);
                }
                count
            }
        }
    }

    /// Schemas in the `{name, description, parameters}` shape model APIs take.
    pub fn schemas_for_api(&self) -> Vec<Value> {
        self.all()
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "parameters": t.schema(),
                })
            })
            .collect()
    }

    /// Run a tool by name.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Tool`] if the name is not in this view, or the
    /// tool's own error.
    pub async fn invoke(
        &self,
        session: &Arc<ChatSession>,
        name: &str,
        args: Value,
    ) -> Result<ToolResult> {
        let tool = self.get(name).ok_or_else(|| {
            GatewayError::Tool(format!("tool {name} is not available in this session"))
        })?;
        tracing::debug!(session_id = %self.session_id, tool = name, "invoking tool");
        tool.execute(session, args).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::directory::Device;
    use crate::transport::ChannelTransport;
    use async_trait::async_trait;

    struct EchoTool(&'static str);

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "echo"
        }

        fn schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(&self, _session: &Arc<ChatSession>, args: Value) -> Result<ToolResult> {
            Ok(ToolResult::success(
                args["text"].as_str().unwrap_or_default().to_owned(),
            ))
        }
    }

    fn global() -> Arc<ToolGlobalRegistry> {
        let mut registry = ToolGlobalRegistry::new();
        registry.register(Arc::new(EchoTool("func_exitSession")));
        registry.register(Arc::new(EchoTool("func_playMusic")));
        Arc::new(registry)
    }

    fn session_with(function_names: Option<&str>) -> Arc<ChatSession> {
        let (transport, _rx) = ChannelTransport::new();
        let session = ChatSession::new("s1", Arc::new(transport));
        let mut device = Device::new("d1");
        device.role_id = Some(1);
        device.function_names = function_names.map(str::to_owned);
        session.set_device(device);
        Arc::new(session)
    }

    #[test]
    fn allow_list_limits_the_view() {
        let session = session_with(Some("func_exitSession"));
        let view = ToolSessionView::new("s1", global());
        assert_eq!(view.register_global_tools(&session), 1);
        assert_eq!(view.all_names(), vec!["func_exitSession"]);
    }

    #[test]
    fn no_allow_list_loads_everything() {
        let session = session_with(None);
        let view = ToolSessionView::new("s1", global());
        assert_eq!(view.register_global_tools(&session), 2);
        assert_eq!(view.all_names(), vec!["func_exitSession", "func_playMusic"]);
    }

    #[test]
    fn unknown_names_are_skipped() {
        let session = session_with(Some("func_missing,func_playMusic"));
        let view = ToolSessionView::new("s1", global());
        assert_eq!(view.register_global_tools(&session), 1);
        assert!(!view.register_from_global("func_missing"));
        assert_eq!(view.all_names(), vec!["func_playMusic"]);
    }

    #[test]
    fn explicit_register_and_unregister() {
        let view = ToolSessionView::new("s1", global());
        view.register(Arc::new(EchoTool("device.lamp")));
        assert!(view.get("device.lamp").is_some());
        assert!(view.unregister("device.lamp"));
        assert!(!view.unregister("device.lamp"));
        assert!(view.all().is_empty());
    }

    #[tokio::test]
    async fn invoke_runs_tool_or_reports_missing() {
        let session = session_with(None);
        let view = ToolSessionView::new("s1", global());
        view.register_global_tools(&session);

        let result = view
            .invoke(&session, "func_playMusic", json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(result.into_reply(), "hi");
        let missing = view.invoke(&session, "nope", json!({})).await;
        assert!(matches!(missing, Err(GatewayError::Tool(_))));
    }

    #[test]
    fn schemas_are_sorted_and_shaped() {
        let session = session_with(None);
        let view = ToolSessionView::new("s1", global());
        view.register_global_tools(&session);
        let schemas = view.schemas_for_api();
        assert_eq!(schemas.len(), 2);
        assert_eq!(schemas[0]["name"], "func_exitSession");
        assert_eq!(schemas[0]["parameters"]["type"], "object");
    }
}
