//! File tools. Reads and writes prefer the batch executor's
//! [`ralph_core::verified_file_context`] when set, falling back to a plain
//! (unverified) open otherwise — e.g. when exercised directly in tests
//! (`spec.md` §4.12).

use std::io::Read;
use std::io::Write;

use ralph_core::tool_registry::ToolExecutor;
use ralph_core::types::ToolCall;
use ralph_core::types::ToolResult;
use ralph_core::verified_file_context;

fn read_whole_file(call: &ToolCall, path: &str) -> Result<String, String> {
    if let Some(contents) = verified_file_context::with_file(|f| {
        let mut buf = String::new();
        f.read_to_string(&mut buf).map(|_| buf)
    }) {
        return contents.map_err(|e| e.to_string());
    }
    let _ = call;
    std::fs::read_to_string(path).map_err(|e| e.to_string())
}

pub struct ReadFile;

impl ToolExecutor for ReadFile {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(path) = call.argument_str("path") else {
            return ToolResult::err(call.id.clone(), r#"{"error":"missing path"}"#.to_string());
        };
        match read_whole_file(call, &path) {
            Ok(contents) => ToolResult::ok(call.id.clone(), contents),
            Err(e) => ToolResult::err(call.id.clone(), format!(r#"{{"error":"{e}"}}"#)),
        }
    }
}

pub struct FileInfo;

impl ToolExecutor for FileInfo {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(path) = call.argument_str("path") else {
            return ToolResult::err(call.id.clone(), r#"{"error":"missing path"}"#.to_string());
        };
        match std::fs::metadata(&path) {
            Ok(meta) => ToolResult::ok(
                call.id.clone(),
                format!(r#"{{"size":{},"is_dir":{}}}"#, meta.len(), meta.is_dir()),
            ),
            Err(e) => ToolResult::err(call.id.clone(), format!(r#"{{"error":"{e}"}}"#)),
        }
    }
}

pub struct ListDir;

impl ToolExecutor for ListDir {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        let path = call.argument_str("path").unwrap_or_else(|| ".".to_string());
        match std::fs::read_dir(&path) {
            Ok(entries) => {
                let names: Vec<String> = entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect();
                ToolResult::ok(call.id.clone(), serde_json::to_string(&names).unwrap_or_default())
            }
            Err(e) => ToolResult::err(call.id.clone(), format!(r#"{{"error":"{e}"}}"#)),
        }
    }
}

pub struct SearchFiles;

impl ToolExecutor for SearchFiles {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(path) = call.argument_str("path") else {
            return ToolResult::err(call.id.clone(), r#"{"error":"missing path"}"#.to_string());
        };
        let Some(pattern) = call.argument_str("pattern") else {
            return ToolResult::err(call.id.clone(), r#"{"error":"missing pattern"}"#.to_string());
        };
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return ToolResult::err(call.id.clone(), format!(r#"{{"error":"{e}"}}"#)),
        };
        let matches: Vec<usize> = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| line.contains(&pattern))
            .map(|(i, _)| i + 1)
            .collect();
        ToolResult::ok(call.id.clone(), serde_json::to_string(&matches).unwrap_or_default())
    }
}

pub struct WriteFile;

impl ToolExecutor for WriteFile {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(path) = call.argument_str("path") else {
            return ToolResult::err(call.id.clone(), r#"{"error":"missing path"}"#.to_string());
        };
        let contents = call.argument_str("content").unwrap_or_default();

        let written = verified_file_context::with_file(|f| f.write_all(contents.as_bytes()));
        let result = match written {
            Some(r) => r.map_err(|e| e.to_string()),
            None => std::fs::write(&path, &contents).map_err(|e| e.to_string()),
        };
        match result {
            Ok(()) => ToolResult::ok(call.id.clone(), r#"{"written":true}"#.to_string()),
            Err(e) => ToolResult::err(call.id.clone(), format!(r#"{{"error":"{e}"}}"#)),
        }
    }
}

pub struct AppendFile;

impl ToolExecutor for AppendFile {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(path) = call.argument_str("path") else {
            return ToolResult::err(call.id.clone(), r#"{"error":"missing path"}"#.to_string());
        };
        let contents = call.argument_str("content").unwrap_or_default();

        let written = verified_file_context::with_file(|f| f.write_all(contents.as_bytes()));
        let result = match written {
            Some(r) => r.map_err(|e| e.to_string()),
            None => std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(&path)
                .and_then(|mut f| f.write_all(contents.as_bytes()))
                .map_err(|e| e.to_string()),
        };
        match result {
            Ok(()) => ToolResult::ok(call.id.clone(), r#"{"appended":true}"#.to_string()),
            Err(e) => ToolResult::err(call.id.clone(), format!(r#"{{"error":"{e}"}}"#)),
        }
    }
}

pub struct ApplyDelta;

impl ToolExecutor for ApplyDelta {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(path) = call.argument_str("path") else {
            return ToolResult::err(call.id.clone(), r#"{"error":"missing path"}"#.to_string());
        };
        let (Some(find), Some(replace)) = (call.argument_str("find"), call.argument_str("replace")) else {
            return ToolResult::err(call.id.clone(), r#"{"error":"missing find or replace"}"#.to_string());
        };

        let original = match read_whole_file(call, &path) {
            Ok(c) => c,
            Err(e) => return ToolResult::err(call.id.clone(), format!(r#"{{"error":"{e}"}}"#)),
        };
        if !original.contains(&find) {
            return ToolResult::err(call.id.clone(), r#"{"error":"find text not present"}"#.to_string());
        }
        let updated = original.replacen(&find, &replace, 1);

        let written = verified_file_context::with_file(|f| {
            use std::io::Seek;
            f.rewind()?;
            f.set_len(0)?;
            f.write_all(updated.as_bytes())
        });
        let result = match written {
            Some(r) => r.map_err(|e| e.to_string()),
            None => std::fs::write(&path, &updated).map_err(|e| e.to_string()),
        };
        match result {
            Ok(()) => ToolResult::ok(call.id.clone(), r#"{"applied":true}"#.to_string()),
            Err(e) => ToolResult::err(call.id.clone(), format!(r#"{{"error":"{e}"}}"#)),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn call(args: &str) -> ToolCall {
        ToolCall { id: "1".to_string(), name: "x".to_string(), arguments_json: args.to_string() }
    }

    #[test]
    fn write_then_read_round_trips_without_verified_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let path_str = path.to_string_lossy().replace('\\', "\\\\");

        let write = WriteFile;
        let result = write.execute(&call(&format!(r#"{{"path":"{path_str}","content":"hi"}}"#)));
        assert!(result.success);

        let read = ReadFile;
        let result = read.execute(&call(&format!(r#"{{"path":"{path_str}"}}"#)));
        assert_eq!(result.result, "hi");
    }

    #[test]
    fn apply_delta_replaces_first_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello world").unwrap();
        let path_str = path.to_string_lossy().replace('\\', "\\\\");

        let tool = ApplyDelta;
        let result = tool.execute(&call(&format!(
            r#"{{"path":"{path_str}","find":"world","replace":"rust"}}"#
        )));
        assert!(result.success);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello rust");
    }

    #[test]
    fn apply_delta_missing_find_text_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello world").unwrap();
        let path_str = path.to_string_lossy().replace('\\', "\\\\");

        let tool = ApplyDelta;
        let result = tool.execute(&call(&format!(
            r#"{{"path":"{path_str}","find":"nope","replace":"x"}}"#
        )));
        assert!(!result.success);
    }

    #[test]
    fn list_dir_lists_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        let path_str = dir.path().to_string_lossy().replace('\\', "\\\\");

        let tool = ListDir;
        let result = tool.execute(&call(&format!(r#"{{"path":"{path_str}"}}"#)));
        assert!(result.result.contains("a.txt"));
    }
}
