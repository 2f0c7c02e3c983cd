//! Concrete tool executors dispatched through `ralph_core::tool_registry`.

pub mod file_tools;
pub mod memory;
pub mod shell;
pub mod subagent;
pub mod unimplemented_tool;
pub mod web_fetch;

use ralph_core::tool_registry::ToolRegistry;

/// Builds a [`ToolRegistry`] with every tool this reference core implements
/// wired in. `ralph-cli` calls this once at startup.
pub fn build_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register("read_file", Box::new(file_tools::ReadFile));
    registry.register("file_info", Box::new(file_tools::FileInfo));
    registry.register("list_dir", Box::new(file_tools::ListDir));
    registry.register("search_files", Box::new(file_tools::SearchFiles));
    registry.register("write_file", Box::new(file_tools::WriteFile));
    registry.register("append_file", Box::new(file_tools::AppendFile));
    registry.register("apply_delta", Box::new(file_tools::ApplyDelta));

    registry.register("shell", Box::new(shell::ShellExecutor::new()));
    registry.register("web_fetch", Box::new(web_fetch::WebFetch::new()));

    let memory_store = memory::new_store();
    registry.register("remember", Box::new(memory::Remember::new(memory_store.clone())));
    registry.register("recall_memories", Box::new(memory::RecallMemories::new(memory_store.clone())));
    registry.register("forget_memory", Box::new(memory::ForgetMemory::new(memory_store)));
    registry.register("todo", Box::new(memory::Todo::new()));

    registry.register("subagent", Box::new(subagent::Subagent));
    registry.register("subagent_status", Box::new(subagent::SubagentStatus));

    registry.register(
        "python",
        Box::new(unimplemented_tool::UnimplementedTool::new("python")),
    );

    registry
}
