//! End-to-end batch scenarios (`spec.md` §8).
#![expect(clippy::unwrap_used)]

use std::sync::atomic::AtomicBool;

use ralph_core::batch_executor::BatchExecutor;
use ralph_core::gate_config::GateConfig;
use ralph_core::protected_files::ProtectedFilesCache;
use ralph_core::tool_registry::ToolExecutor;
use ralph_core::tool_registry::ToolRegistry;
use ralph_core::types::ApprovalResult;
use ralph_core::types::GateAction;
use ralph_core::types::GateCategory;
use ralph_core::types::ToolCall;
use ralph_core::types::ToolResult;

struct Echo;
impl ToolExecutor for Echo {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        ToolResult::ok(call.id.clone(), r#"{"ok":true}"#.to_string())
    }
}

fn call(id: &str, name: &str, args: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments_json: args.to_string(),
    }
}

#[test]
fn allowed_file_read_runs_without_gating() {
    let mut config = GateConfig::new();
    let protected = ProtectedFilesCache::with_defaults(vec![]);
    let mut registry = ToolRegistry::new();
    registry.register("read_file", Box::new(Echo));
    let cancelled = AtomicBool::new(false);

    let mut executor = BatchExecutor::new(&mut config, &protected, &registry, &cancelled);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "hello").unwrap();
    let args = format!(r#"{{"path":"{}"}}"#, path.to_string_lossy().replace('\\', "\\\\"));

    let results = executor.execute_batch(&[call("1", "read_file", &args)], |_| {});
    assert!(results[0].success);
}

#[test]
fn gated_shell_matching_allowlist_is_allowed_without_a_prompter() {
    let mut config = GateConfig::new();
    config.allowlist.push_session_shell(vec!["git".to_string(), "status".to_string()], None);
    let protected = ProtectedFilesCache::with_defaults(vec![]);
    let mut registry = ToolRegistry::new();
    registry.register("shell", Box::new(Echo));
    let cancelled = AtomicBool::new(false);

    let mut executor = BatchExecutor::new(&mut config, &protected, &registry, &cancelled);
    let results = executor.execute_batch(&[call("1", "shell", r#"{"command":"git status"}"#)], |_| {});
    assert!(results[0].success);
}

#[test]
fn gated_shell_with_injection_is_denied_even_with_an_allowlist_prefix_match() {
    let mut config = GateConfig::new();
    config.allowlist.push_session_shell(vec!["git".to_string(), "status".to_string()], None);
    let protected = ProtectedFilesCache::with_defaults(vec![]);
    let registry = ToolRegistry::new();
    let cancelled = AtomicBool::new(false);

    let mut executor = BatchExecutor::new(&mut config, &protected, &registry, &cancelled);
    let results = executor.execute_batch(
        &[call("1", "shell", r#"{"command":"git status; rm -rf /"}"#)],
        |_| {},
    );
    assert!(!results[0].success);
    assert!(results[0].result.contains("non_interactive_gate"));
}

#[test]
fn protected_file_write_is_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let env_path = dir.path().join(".env");
    std::fs::write(&env_path, "SECRET=1").unwrap();

    let mut config = GateConfig::new();
    config.categories.insert(GateCategory::FileWrite, GateAction::Allow);
    let protected = ProtectedFilesCache::with_defaults(vec![env_path.to_string_lossy().into_owned()]);
    let registry = ToolRegistry::new();
    let cancelled = AtomicBool::new(false);

    let args = format!(r#"{{"path":"{}"}}"#, env_path.to_string_lossy().replace('\\', "\\\\"));
    let mut executor = BatchExecutor::new(&mut config, &protected, &registry, &cancelled);
    let results = executor.execute_batch(&[call("1", "write_file", &args)], |_| {});
    assert!(!results[0].success);
    assert!(results[0].result.contains("protected_file"));
}

#[test]
fn non_interactive_deny_without_prompter_or_subagent_channel() {
    let mut config = GateConfig::new();
    let protected = ProtectedFilesCache::with_defaults(vec![]);
    let registry = ToolRegistry::new();
    let cancelled = AtomicBool::new(false);

    let mut executor = BatchExecutor::new(&mut config, &protected, &registry, &cancelled);
    let results = executor.execute_batch(&[call("1", "web_fetch", r#"{"url":"https://example.com"}"#)], |_| {});
    assert!(!results[0].success);
    assert!(results[0].result.contains("non_interactive_gate"));
}

#[test]
fn subagent_spawn_cap_denies_once_the_limit_is_reached() {
    let mut config = GateConfig::new();
    config.categories.insert(GateCategory::Subagent, GateAction::Allow);
    let protected = ProtectedFilesCache::with_defaults(vec![]);
    let mut registry = ToolRegistry::new();
    registry.register("subagent", Box::new(Echo));
    let cancelled = AtomicBool::new(false);

    let mut executor = BatchExecutor::new(&mut config, &protected, &registry, &cancelled);
    executor.max_subagents = 1;
    let results = executor.execute_batch(
        &[
            call("1", "subagent", r#"{"task":"a"}"#),
            call("2", "subagent", r#"{"task":"b"}"#),
        ],
        |_| {},
    );
    assert!(results[0].success);
    assert!(!results[1].success);
    assert!(results[1].result.contains("duplicate_subagent"));
}

#[test]
fn session_allowlist_grows_after_an_allowed_always_equivalent_entry() {
    // Mirrors the sibling-auto-approval scenario: once a pattern lands in
    // the session allowlist, a later structurally-identical call in the
    // same batch no longer needs a prompter.
    let mut config = GateConfig::new();
    config.allowlist.push_session_regex("write_file", r#"^\{"path":"/tmp/[^"]*","content":".*"\}$"#);
    let protected = ProtectedFilesCache::with_defaults(vec![]);
    let mut registry = ToolRegistry::new();
    registry.register("write_file", Box::new(Echo));
    let cancelled = AtomicBool::new(false);

    let mut executor = BatchExecutor::new(&mut config, &protected, &registry, &cancelled);
    let results = executor.execute_batch(
        &[call("1", "write_file", r#"{"path":"/tmp/a","content":"x"}"#)],
        |_| {},
    );
    assert!(results[0].success);
}

#[test]
fn cancellation_mid_batch_marks_remainder_interrupted() {
    let mut config = GateConfig::new();
    let protected = ProtectedFilesCache::with_defaults(vec![]);
    let mut registry = ToolRegistry::new();
    registry.register("remember", Box::new(Echo));
    let cancelled = AtomicBool::new(false);

    let mut executor = BatchExecutor::new(&mut config, &protected, &registry, &cancelled);
    cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
    let results = executor.execute_batch(
        &[call("1", "remember", "{}"), call("2", "remember", "{}")],
        |_| {},
    );
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.result.contains("interrupted")));
}

#[test]
fn multiple_gated_calls_without_a_prompter_are_each_denied_independently() {
    // Exercises the `check_batch` pre-pass end to end: two distinct shell
    // calls in one batch, neither allowlisted, no prompter and no subagent
    // channel wired. Both must come back denied, not just the first.
    let mut config = GateConfig::new();
    let protected = ProtectedFilesCache::with_defaults(vec![]);
    let registry = ToolRegistry::new();
    let cancelled = AtomicBool::new(false);

    let mut executor = BatchExecutor::new(&mut config, &protected, &registry, &cancelled);
    let results = executor.execute_batch(
        &[
            call("1", "shell", r#"{"command":"git status"}"#),
            call("2", "shell", r#"{"command":"git log"}"#),
        ],
        |_| {},
    );
    assert!(!results[0].success);
    assert!(!results[1].success);
    assert!(results[0].result.contains("non_interactive_gate"));
    assert!(results[1].result.contains("non_interactive_gate"));
}

#[test]
fn approval_result_equality_covers_all_outcomes_used_by_the_executor() {
    // Guards the `execute_batch` abort check (`last_outcome == Aborted`)
    // against an enum change silently breaking equality.
    assert_eq!(ApprovalResult::Aborted, ApprovalResult::Aborted);
    assert_ne!(ApprovalResult::Aborted, ApprovalResult::Denied);
}
