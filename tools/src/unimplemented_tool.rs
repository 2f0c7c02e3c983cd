//! Placeholder for tool categories the spec names (`python`, `mcp_*`) whose
//! actual execution backend is out of scope for this reference core
//! (`spec.md` §1 Non-goals: tool implementations themselves).

use ralph_core::tool_registry::ToolExecutor;
use ralph_core::types::ToolCall;
use ralph_core::types::ToolResult;

pub struct UnimplementedTool {
    name: &'static str,
}

impl UnimplementedTool {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl ToolExecutor for UnimplementedTool {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        ToolResult::err(
            call.id.clone(),
            format!(r#"{{"error":"not implemented in this reference core","tool":"{}"}}"#, self.name),
        )
    }
}
