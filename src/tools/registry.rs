//! Process-wide tool catalogue.
//!
//! Populated once at startup and shared read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use super::types::Tool;
use crate::session::ChatSession;

#[derive(Default)]
pub struct ToolGlobalRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolGlobalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolGlobalRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolGlobalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_owned(), tool);
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Every tool applicable to `session`, sorted by name.
    pub fn all_applicable(&self, session: &ChatSession) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = self
            .tools
            .values()
            .filter(|t| t.applicable(session))
            .cloned()
            .collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::error::Result;
    use crate::tools::ToolResult;
    use crate::transport::ChannelTransport;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct NamedTool {
        name: &'static str,
        needs_roles: bool,
    }

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "test tool"
        }

        fn schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn applicable(&self, session: &ChatSession) -> bool {
            !self.needs_roles || session.roles().len() > 1
        }

        async fn execute(&self, _session: &Arc<ChatSession>, _args: Value) -> Result<ToolResult> {
            Ok(ToolResult::success(self.name))
        }
    }

    #[test]
    fn resolve_and_list_sorted() {
        let mut registry = ToolGlobalRegistry::new();
        registry.register(Arc::new(NamedTool {
            name: "b",
            needs_roles: false,
        }));
        registry.register(Arc::new(NamedTool {
            name: "a",
            needs_roles: false,
        }));
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.resolve("a").is_some());
        assert!(registry.resolve("c").is_none());
    }

    #[test]
    fn applicability_filters_by_session() {
        let mut registry = ToolGlobalRegistry::new();
        registry.register(Arc::new(NamedTool {
            name: "always",
            needs_roles: false,
        }));
        registry.register(Arc::new(NamedTool {
            name: "switch",
            needs_roles: true,
        }));
        let (transport, _rx) = ChannelTransport::new();
        let session = ChatSession::new("s1", Arc::new(transport));

        let names: Vec<String> = registry
            .all_applicable(&session)
            .iter()
            .map(|t| t.name().to_owned())
            .collect();
        assert_eq!(names, vec!["always"]);

        session.set_roles(vec![Default::default(), Default::default()]);
        assert_eq!(registry.all_applicable(&session).len(), 2);
    }
}
