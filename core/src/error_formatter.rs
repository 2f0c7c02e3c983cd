//! Stable JSON error shapes returned to the model as a failed
//! [`crate::types::ToolResult::result`] (`spec.md` §4.14).

use crate::error::VerifyError;

#[derive(Debug, Clone)]
pub enum ErrorShape {
    Interrupted,
    OperationDenied { tool: String },
    ProtectedFile { path: String },
    RateLimited { tool: String, retry_after_secs: u64 },
    NonInteractiveGate { tool: String, category: String },
    DuplicateSubagent { tool: String },
    PathChanged { path: String },
    InodeMismatch { path: String },
    ParentChanged { path: String },
    SymlinkRejected { path: String },
    AlreadyExists { path: String },
    Aborted,
}

impl ErrorShape {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorShape::Interrupted => "interrupted",
            ErrorShape::OperationDenied { .. } => "operation_denied",
            ErrorShape::ProtectedFile { .. } => "protected_file",
            ErrorShape::RateLimited { .. } => "rate_limited",
            ErrorShape::NonInteractiveGate { .. } => "non_interactive_gate",
            ErrorShape::DuplicateSubagent { .. } => "duplicate_subagent",
            ErrorShape::PathChanged { .. } => "path_changed",
            ErrorShape::InodeMismatch { .. } => "inode_mismatch",
            ErrorShape::ParentChanged { .. } => "parent_changed",
            ErrorShape::SymlinkRejected { .. } => "symlink_rejected",
            ErrorShape::AlreadyExists { .. } => "already_exists",
            ErrorShape::Aborted => "aborted",
        }
    }

    /// The human-readable half of every shape (`spec.md` §4.14 `message`
    /// column). Kept as a single source of truth so `to_json` doesn't repeat
    /// the wording per variant.
    fn message(&self) -> String {
        match self {
            ErrorShape::Interrupted => "batch execution was cancelled".to_string(),
            ErrorShape::OperationDenied { tool } => format!("the user denied the {tool} call"),
            ErrorShape::ProtectedFile { path } => format!("{path} is a protected file and cannot be accessed"),
            ErrorShape::RateLimited { tool, .. } => format!("{tool} is temporarily rate-limited after repeated denials"),
            ErrorShape::NonInteractiveGate { tool, .. } => {
                format!("{tool} requires approval but no interactive terminal is available")
            }
            ErrorShape::DuplicateSubagent { .. } => "a subagent was already spawned this turn".to_string(),
            ErrorShape::PathChanged { path } => format!("{path} changed before it could be opened"),
            ErrorShape::InodeMismatch { path } => format!("{path} changed before it could be opened"),
            ErrorShape::ParentChanged { path } => {
                format!("the parent directory of {path} changed before it could be created")
            }
            ErrorShape::SymlinkRejected { path } => format!("refusing to follow the symlink at {path}"),
            ErrorShape::AlreadyExists { path } => format!("{path} already exists"),
            ErrorShape::Aborted => "the user aborted the approval prompt".to_string(),
        }
    }

    /// `--allow-category=<cat>` suggestion text for [`ErrorShape::NonInteractiveGate`].
    fn non_interactive_suggestion(category: &str) -> String {
        format!("Use --yolo to disable approval gates, or --allow-category={category} to allow this category without prompting.")
    }

    /// Suggestion text for [`ErrorShape::OperationDenied`].
    fn operation_denied_suggestion(tool: &str) -> String {
        format!("Adjust the {tool} call and try again, or pre-approve it with --allow.")
    }

    pub fn to_json(&self) -> String {
        let code = self.code();
        let message = escape_json(&self.message());
        match self {
            ErrorShape::Interrupted | ErrorShape::Aborted => {
                format!(r#"{{"error":"{code}","message":"{message}"}}"#)
            }
            ErrorShape::OperationDenied { tool } => {
                let suggestion = escape_json(&Self::operation_denied_suggestion(tool));
                format!(
                    r#"{{"error":"{code}","message":"{message}","tool":"{}","suggestion":"{suggestion}"}}"#,
                    escape_json(tool)
                )
            }
            ErrorShape::NonInteractiveGate { tool, category } => {
                let suggestion = escape_json(&Self::non_interactive_suggestion(category));
                format!(
                    r#"{{"error":"{code}","message":"{message}","tool":"{}","category":"{}","suggestion":"{suggestion}"}}"#,
                    escape_json(tool),
                    escape_json(category)
                )
            }
            ErrorShape::DuplicateSubagent { tool } => {
                format!(r#"{{"error":"{code}","message":"{message}","tool":"{}"}}"#, escape_json(tool))
            }
            ErrorShape::ProtectedFile { path }
            | ErrorShape::PathChanged { path }
            | ErrorShape::InodeMismatch { path }
            | ErrorShape::ParentChanged { path }
            | ErrorShape::SymlinkRejected { path }
            | ErrorShape::AlreadyExists { path } => {
                format!(r#"{{"error":"{code}","message":"{message}","path":"{}"}}"#, escape_json(path))
            }
            ErrorShape::RateLimited { tool, retry_after_secs } => format!(
                r#"{{"error":"{code}","message":"{message}","tool":"{}","retry_after_secs":{retry_after_secs}}}"#,
                escape_json(tool)
            ),
        }
    }
}

/// Maps a [`VerifyError`] onto its stable shape, given the user-facing path
/// the verification was for (the error itself only carries internal detail
/// strings, not the original path).
pub fn from_verify_error(err: &VerifyError, path: &str) -> ErrorShape {
    match err {
        VerifyError::InvalidPath(_) | VerifyError::Open(_) | VerifyError::Stat(_) => {
            ErrorShape::PathChanged { path: path.to_string() }
        }
        VerifyError::InodeMismatch => ErrorShape::InodeMismatch { path: path.to_string() },
        VerifyError::ParentChanged => ErrorShape::ParentChanged { path: path.to_string() },
        VerifyError::AlreadyExists => ErrorShape::AlreadyExists { path: path.to_string() },
        VerifyError::SymlinkRejected => ErrorShape::SymlinkRejected { path: path.to_string() },
    }
}

/// Escapes a string for embedding inside one of the JSON shapes above. The
/// shapes are hand-assembled (not built through `serde_json`) so every
/// interpolated string must go through this first.
pub fn escape_json(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn operation_denied_shape_carries_a_suggestion() {
        let shape = ErrorShape::OperationDenied { tool: "shell".to_string() };
        let json = shape.to_json();
        assert!(json.contains(r#""error":"operation_denied""#));
        assert!(json.contains(r#""tool":"shell""#));
        assert!(json.contains("\"message\""));
        assert!(json.contains("\"suggestion\""));
    }

    #[test]
    fn non_interactive_gate_shape_carries_category_and_suggestion() {
        let shape = ErrorShape::NonInteractiveGate {
            tool: "shell".to_string(),
            category: "shell".to_string(),
        };
        let json = shape.to_json();
        assert!(json.contains(r#""error":"non_interactive_gate""#));
        assert!(json.contains(r#""tool":"shell""#));
        assert!(json.contains(r#""category":"shell""#));
        assert!(json.contains("--allow-category=shell"));
    }

    #[test]
    fn rate_limited_shape_carries_retry_after() {
        let shape = ErrorShape::RateLimited {
            tool: "shell".to_string(),
            retry_after_secs: 60,
        };
        let json = shape.to_json();
        assert!(json.contains(r#""error":"rate_limited""#));
        assert!(json.contains(r#""tool":"shell""#));
        assert!(json.contains(r#""retry_after_secs":60"#));
    }

    #[test]
    fn aborted_shape_carries_a_message() {
        let json = ErrorShape::Aborted.to_json();
        assert_eq!(json, format!(r#"{{"error":"aborted","message":"{}"}}"#, ErrorShape::Aborted.message()));
    }

    #[test]
    fn escape_json_handles_quotes_and_backslashes() {
        assert_eq!(escape_json(r#"a"b\c"#), r#"a\"b\\c"#);
    }

    #[test]
    fn verify_error_maps_to_inode_mismatch() {
        let shape = from_verify_error(&VerifyError::InodeMismatch, "/tmp/a.txt");
        assert_eq!(shape.code(), "inode_mismatch");
        assert!(shape.to_json().contains("/tmp/a.txt"));
    }
}
