//! Subagent tool: re-execs the current binary as `ralph subagent-worker`,
//! inheriting approval-channel pipe file descriptors on fds 3/4 rather than
//! using a literal `fork()` (`spec.md` §4.11; see `DESIGN.md`).

use std::collections::HashMap;
use std::process::Child;
use std::sync::Mutex;
use std::sync::OnceLock;

use ralph_core::approval_channel::PendingChannel;
use ralph_core::tool_registry::ToolExecutor;
use ralph_core::types::ToolCall;
use ralph_core::types::ToolResult;

struct Handle {
    child: Child,
}

fn registry() -> &'static Mutex<HashMap<String, Handle>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Handle>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock() -> std::sync::MutexGuard<'static, HashMap<String, Handle>> {
    match registry().lock() {
        Ok(g) => g,
        Err(p) => p.into_inner(),
    }
}

/// Pending-channel mailbox: every `spawn_subagent` call drops its parent-side
/// pipe ends here instead of closing them, for `ralph-cli`'s batch loop to
/// collect into its own `ApprovalMultiplexer` (`take_pending_channels`).
fn pending_channels() -> &'static Mutex<Vec<PendingChannel>> {
    static PENDING: OnceLock<Mutex<Vec<PendingChannel>>> = OnceLock::new();
    PENDING.get_or_init(|| Mutex::new(Vec::new()))
}

/// Drains every subagent approval channel registered since the last call.
/// `ralph-cli`'s batch loop calls this once per step so newly spawned
/// subagents get folded into the multiplexer it's already draining
/// (`spec.md` §4.11).
pub fn take_pending_channels() -> Vec<PendingChannel> {
    let mut guard = match pending_channels().lock() {
        Ok(g) => g,
        Err(p) => p.into_inner(),
    };
    std::mem::take(&mut *guard)
}

pub struct Subagent;

impl ToolExecutor for Subagent {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(task) = call.argument_str("task") else {
            return ToolResult::err(call.id.clone(), r#"{"error":"missing task"}"#.to_string());
        };
        match spawn_subagent(&task) {
            Ok(id) => ToolResult::ok(call.id.clone(), format!(r#"{{"subagent_id":"{id}"}}"#)),
            Err(e) => ToolResult::err(call.id.clone(), format!(r#"{{"error":"{e}"}}"#)),
        }
    }
}

pub struct SubagentStatus;

impl ToolExecutor for SubagentStatus {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(id) = call.argument_str("subagent_id") else {
            return ToolResult::err(call.id.clone(), r#"{"error":"missing subagent_id"}"#.to_string());
        };
        let mut registry = lock();
        let Some(handle) = registry.get_mut(&id) else {
            return ToolResult::err(call.id.clone(), r#"{"error":"unknown subagent_id"}"#.to_string());
        };
        match handle.child.try_wait() {
            Ok(Some(status)) => {
                let exit_code = status.code().unwrap_or(-1);
                registry.remove(&id);
                ToolResult::ok(call.id.clone(), format!(r#"{{"running":false,"exit_code":{exit_code}}}"#))
            }
            Ok(None) => ToolResult::ok(call.id.clone(), r#"{"running":true}"#.to_string()),
            Err(e) => ToolResult::err(call.id.clone(), format!(r#"{{"error":"{e}"}}"#)),
        }
    }
}

/// Spawns `ralph subagent-worker`, wiring its fd 3 to the write end of a
/// fresh request pipe and its fd 4 to the read end of a fresh response
/// pipe. The parent keeps the opposite ends, parked in
/// [`pending_channels`] until `ralph-cli`'s batch loop collects them
/// (via [`take_pending_channels`]) into its own
/// [`ralph_core::approval_channel::ApprovalMultiplexer`], which forwards the
/// child's gated prompts back through this process's own prompter.
#[cfg(unix)]
fn spawn_subagent(task: &str) -> Result<String, String> {
    use std::io::Write;
    use std::os::unix::io::FromRawFd;
    use std::os::unix::process::CommandExt;
    use std::process::Command;
    use std::process::Stdio;

    let mut req_fds = [0i32; 2];
    let mut resp_fds = [0i32; 2];
    unsafe {
        if libc::pipe(req_fds.as_mut_ptr()) != 0 {
            return Err("failed to create request pipe".to_string());
        }
        if libc::pipe(resp_fds.as_mut_ptr()) != 0 {
            return Err("failed to create response pipe".to_string());
        }
    }
    let (req_read, req_write) = (req_fds[0], req_fds[1]);
    let (resp_read, resp_write) = (resp_fds[0], resp_fds[1]);

    let exe = std::env::current_exe().map_err(|e| e.to_string())?;
    let mut command = Command::new(exe);
    command
        .arg("subagent-worker")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    unsafe {
        command.pre_exec(move || {
            if libc::dup2(req_write, 3) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::dup2(resp_read, 4) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            libc::close(req_read);
            libc::close(resp_write);
            Ok(())
        });
    }

    let mut child = command.spawn().map_err(|e| e.to_string())?;
    let pid = child.id();

    // The child now owns fds 3/4; close this process's copies of the ends
    // it duplicated from so the pipes only have one writer/reader each.
    unsafe {
        libc::close(req_write);
        libc::close(resp_read);
    }
    // Ends the parent keeps for its ApprovalMultiplexer.
    let request_rx = unsafe { std::fs::File::from_raw_fd(req_read) };
    let response_tx = unsafe { std::fs::File::from_raw_fd(resp_write) };
    if let Ok(mut mailbox) = pending_channels().lock() {
        mailbox.push(PendingChannel {
            subagent_pid: pid,
            request_rx,
            response_tx,
        });
    }

    if let Some(stdin) = child.stdin.as_mut() {
        stdin.write_all(task.as_bytes()).map_err(|e| e.to_string())?;
    }

    let id = format!("sub-{pid}");
    lock().insert(id.clone(), Handle { child });
    Ok(id)
}

#[cfg(windows)]
fn spawn_subagent(_task: &str) -> Result<String, String> {
    Err("subagent spawning requires the Unix pipe-fd transport; unsupported on this platform in this reference core".to_string())
}
