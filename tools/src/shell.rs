//! Shell tool executor, grounded on the teacher's child-process spawn and
//! capped-output-reading pattern (`codex-rs/core/src/exec.rs`).

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Command;

use ralph_core::tool_registry::ToolExecutor;
use ralph_core::types::ToolCall;
use ralph_core::types::ToolResult;

const MAX_STREAM_OUTPUT: usize = 10 * 1024;
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

pub struct ShellExecutor {
    runtime: tokio::runtime::Runtime,
}

impl ShellExecutor {
    #[expect(clippy::expect_used)]
    pub fn new() -> Self {
        Self {
            runtime: tokio::runtime::Runtime::new().expect("failed to start shell executor runtime"),
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolExecutor for ShellExecutor {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(command) = call.argument_str("command") else {
            return ToolResult::err(call.id.clone(), r#"{"error":"missing command"}"#.to_string());
        };
        let timeout_ms = call
            .argument_str("timeout_ms")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        match self.runtime.block_on(run_command(&command, timeout_ms)) {
            Ok(output) => ToolResult::ok(call.id.clone(), output),
            Err(e) => ToolResult::err(call.id.clone(), format!(r#"{{"error":"{e}"}}"#)),
        }
    }
}

async fn run_command(command: &str, timeout_ms: u64) -> Result<String, String> {
    let mut child = Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| e.to_string())?;

    let stdout_reader = child.stdout.take().ok_or("stdout pipe unavailable")?;
    let stderr_reader = child.stderr.take().ok_or("stderr pipe unavailable")?;

    let stdout_task = tokio::spawn(read_capped(BufReader::new(stdout_reader), MAX_STREAM_OUTPUT));
    let stderr_task = tokio::spawn(read_capped(BufReader::new(stderr_reader), MAX_STREAM_OUTPUT));

    let timeout = Duration::from_millis(timeout_ms);
    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return Err(e.to_string()),
        Err(_) => {
            let _ = child.start_kill();
            return Err("command timed out".to_string());
        }
    };

    let stdout = stdout_task.await.map_err(|e| e.to_string())?.map_err(|e| e.to_string())?;
    let stderr = stderr_task.await.map_err(|e| e.to_string())?.map_err(|e| e.to_string())?;

    let exit_code = status.code().unwrap_or(-1);
    Ok(format!(
        r#"{{"exit_code":{exit_code},"stdout":{},"stderr":{}}}"#,
        serde_json::to_string(&stdout).unwrap_or_default(),
        serde_json::to_string(&stderr).unwrap_or_default()
    ))
}

async fn read_capped<R: tokio::io::AsyncRead + Unpin>(mut reader: R, max_bytes: usize) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(max_bytes.min(8 * 1024));
    let mut tmp = [0u8; 8192];
    loop {
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        let remaining = max_bytes.saturating_sub(buf.len());
        if remaining == 0 {
            continue;
        }
        buf.extend_from_slice(&tmp[..n.min(remaining)]);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn call(args: &str) -> ToolCall {
        ToolCall { id: "1".to_string(), name: "shell".to_string(), arguments_json: args.to_string() }
    }

    #[test]
    fn echo_succeeds() {
        let tool = ShellExecutor::new();
        let result = tool.execute(&call(r#"{"command":"echo hi"}"#));
        assert!(result.success);
        assert!(result.result.contains("hi"));
    }

    #[test]
    fn missing_command_errors() {
        let tool = ShellExecutor::new();
        let result = tool.execute(&call(r#"{}"#));
        assert!(!result.success);
    }

    #[test]
    fn timeout_kills_long_running_command() {
        let tool = ShellExecutor::new();
        let result = tool.execute(&call(r#"{"command":"sleep 5","timeout_ms":"50"}"#));
        assert!(!result.success);
    }
}
