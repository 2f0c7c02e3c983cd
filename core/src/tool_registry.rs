//! Tool registry: the seam between policy (this crate) and tool execution
//! (`ralph-tools`) (`spec.md` §3 `ToolRegistry`, ambient Tool Registry).

use std::collections::HashMap;

use crate::types::ToolCall;
use crate::types::ToolResult;

/// Implemented once per concrete tool by `ralph-tools`. Kept synchronous at
/// this seam; async executors (shell, web_fetch) drive their own runtime
/// internally rather than leaking `async fn` into the policy core.
pub trait ToolExecutor: Send + Sync {
    fn execute(&self, call: &ToolCall) -> ToolResult;
}

#[derive(Default)]
pub struct ToolRegistry {
    executors: HashMap<String, Box<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool_name: impl Into<String>, executor: Box<dyn ToolExecutor>) {
        self.executors.insert(tool_name.into(), executor);
    }

    pub fn get(&self, tool_name: &str) -> Option<&dyn ToolExecutor> {
        self.executors.get(tool_name).map(|b| b.as_ref())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    struct Echo;
    impl ToolExecutor for Echo {
        fn execute(&self, call: &ToolCall) -> ToolResult {
            ToolResult::ok(call.id.clone(), call.arguments_json.clone())
        }
    }

    #[test]
    fn register_and_dispatch() {
        let mut registry = ToolRegistry::new();
        registry.register("echo", Box::new(Echo));
        let call = ToolCall {
            id: "1".into(),
            name: "echo".into(),
            arguments_json: "{}".into(),
        };
        let result = registry.get("echo").unwrap().execute(&call);
        assert!(result.success);
    }

    #[test]
    fn unknown_tool_returns_none() {
        let registry = ToolRegistry::new();
        assert!(registry.get("nope").is_none());
    }
}
