//! Shared data model for the tool dispatch & policy core (`spec.md` §3).

use serde::Deserialize;
use serde::Serialize;

/// A single tool invocation proposed by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments_json: String,
}

impl ToolCall {
    /// Parses `arguments_json` and extracts a single string field, owned.
    ///
    /// This is the one argument-extraction utility `spec.md` §3 calls for;
    /// every call site in the core goes through this instead of hand-rolling
    /// JSON digging.
    pub fn argument_str(&self, field: &str) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(&self.arguments_json).ok()?;
        value.get(field)?.as_str().map(str::to_owned)
    }
}

/// The result of running (or refusing to run) a [`ToolCall`], returned to
/// the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub result: String,
    pub success: bool,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: result.into(),
            success: true,
        }
    }

    pub fn err(tool_call_id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: result.into(),
            success: false,
        }
    }
}

/// The closed set of gate categories a tool call is sorted into before a
/// policy decision is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCategory {
    FileRead,
    FileWrite,
    Shell,
    Network,
    Memory,
    Subagent,
    Mcp,
    Python,
}

impl GateCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            GateCategory::FileRead => "file_read",
            GateCategory::FileWrite => "file_write",
            GateCategory::Shell => "shell",
            GateCategory::Network => "network",
            GateCategory::Memory => "memory",
            GateCategory::Subagent => "subagent",
            GateCategory::Mcp => "mcp",
            GateCategory::Python => "python",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "file_read" => GateCategory::FileRead,
            "file_write" => GateCategory::FileWrite,
            "shell" => GateCategory::Shell,
            "network" => GateCategory::Network,
            "memory" => GateCategory::Memory,
            "subagent" => GateCategory::Subagent,
            "mcp" => GateCategory::Mcp,
            "python" => GateCategory::Python,
            _ => return None,
        })
    }

    /// Tool-name → category table from `spec.md` §4.10.
    ///
    /// Python tools may override this via a `Gate:` docstring directive;
    /// that lookup happens one layer up in `approval_engine::categorize`
    /// because it needs access to tool metadata this module doesn't have.
    pub fn categorize(tool_name: &str) -> GateCategory {
        match tool_name {
            "remember" | "recall_memories" | "forget_memory" | "todo" => GateCategory::Memory,
            name if name.starts_with("vector_db_") => GateCategory::Memory,
            name if name.starts_with("mcp_") => GateCategory::Mcp,
            "shell" => GateCategory::Shell,
            "web_fetch" => GateCategory::Network,
            "read_file" | "file_info" | "list_dir" | "search_files" | "process_pdf_document" => {
                GateCategory::FileRead
            }
            "write_file" | "append_file" | "apply_delta" => GateCategory::FileWrite,
            "python" => GateCategory::Python,
            "subagent" | "subagent_status" => GateCategory::Subagent,
            _ => GateCategory::Python,
        }
    }
}

/// The closed set of actions a category can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    Allow,
    Gate,
    Deny,
}

/// Shell dialect a command string should be parsed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellType {
    Posix,
    Cmd,
    Powershell,
    Unknown,
}

/// Outcome of an approval decision (`spec.md` §3, `ApprovalResult`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalResult {
    Allowed,
    AllowedAlways,
    Denied,
    RateLimited,
    NonInteractiveDenied,
    Aborted,
}

/// How a file-touching tool wants to open its verified path (`spec.md` §4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifiedFileMode {
    Read,
    Write,
    Append,
    ReadWrite,
}
