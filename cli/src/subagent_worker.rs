//! `ralph subagent-worker`: the re-exec'd child side of a spawned subagent
//! (`spec.md` §4.11). Reads the task string its parent wrote to stdin, runs
//! it as a single `shell` call, and proxies any gated prompt back to the
//! parent over the approval-channel fds it inherited at fd 3 (request write
//! end) and fd 4 (response read end).

use std::io::Read;
use std::sync::atomic::AtomicBool;

#[cfg(unix)]
use ralph_core::approval_channel::SubagentChannel;
use ralph_core::batch_executor::BatchExecutor;
use ralph_core::gate_config::GateConfig;
use ralph_core::protected_files::ProtectedFilesCache;
use ralph_core::types::ToolCall;

/// Reconstructs the inherited static allowlist/category policy from disk
/// rather than over the wire: both processes share a working directory, so
/// reloading `ralph.config.json` gives the child the same static entries
/// `GateConfig::init_from_parent` would have cloned. Session entries the
/// parent picked up at runtime (via `--allow` or an `AllowedAlways` answer)
/// are not visible to the child under this simplification; see `DESIGN.md`.
fn child_config() -> GateConfig {
    let cwd = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
    let loaded = ralph_core::config::load_gate_config(&cwd);
    let mut config = GateConfig::new();
    config.enabled = loaded.enabled;
    config.categories = loaded.categories;
    config.allowlist = loaded.allowlist;
    config.is_subagent = true;
    config
}

pub fn run() -> i32 {
    let mut task = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut task) {
        tracing::error!(error = %e, "subagent worker failed to read task from stdin");
        return 1;
    }

    let call = ToolCall {
        id: "subagent-task".to_string(),
        name: "shell".to_string(),
        arguments_json: format!(r#"{{"command":{}}}"#, serde_json::to_string(&task).unwrap_or_default()),
    };

    #[cfg(unix)]
    let mut channel = match open_inherited_channel() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "subagent worker could not open inherited approval fds");
            return 1;
        }
    };

    let mut config = child_config();
    let cwd = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
    let protected_files = ProtectedFilesCache::with_defaults(vec![
        cwd.join("ralph.config.json").to_string_lossy().into_owned(),
        cwd.join(".env").to_string_lossy().into_owned(),
    ]);
    let registry = ralph_tools::build_registry();
    let cancelled = AtomicBool::new(false);

    let mut executor = BatchExecutor::new(&mut config, &protected_files, &registry, &cancelled);
    #[cfg(unix)]
    {
        executor.subagent_channel = Some(&mut channel);
    }

    let results = executor.execute_batch(&[call], |event| {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
    });

    match serde_json::to_string(&results) {
        Ok(line) => {
            println!("{line}");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "subagent worker failed to serialize results");
            1
        }
    }
}

/// Wraps the fds the parent wired up in `pre_exec` (`ralph-tools`'s
/// `subagent::spawn_subagent`): fd 3 is this process's write end of the
/// request pipe, fd 4 is its read end of the response pipe.
#[cfg(unix)]
fn open_inherited_channel() -> std::io::Result<SubagentChannel> {
    use std::os::unix::io::FromRawFd;

    const REQUEST_FD: std::os::unix::io::RawFd = 3;
    const RESPONSE_FD: std::os::unix::io::RawFd = 4;

    // SAFETY: the parent dup2'd these fds into place before exec'ing us; a
    // fcntl probe confirms they're actually open descriptors before we trust
    // them, since a direct invocation without the parent's wiring would
    // otherwise silently adopt whatever fds 3/4 happen to be.
    unsafe {
        if libc::fcntl(REQUEST_FD, libc::F_GETFD) < 0 || libc::fcntl(RESPONSE_FD, libc::F_GETFD) < 0 {
            return Err(std::io::Error::other("fds 3/4 not inherited; not running under a parent ralph process"));
        }
        let request_tx = std::fs::File::from_raw_fd(REQUEST_FD);
        let response_rx = std::fs::File::from_raw_fd(RESPONSE_FD);
        Ok(SubagentChannel::new(request_tx, response_rx))
    }
}
