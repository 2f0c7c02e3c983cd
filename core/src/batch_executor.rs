//! Top-level batch execution loop (`spec.md` §3 `execute_batch`, §4.13).

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use serde::Serialize;

use crate::approval_channel::ApprovalMultiplexer;
use crate::approval_channel::PendingChannel;
use crate::approval_channel::SubagentChannel;
use crate::approval_engine::ApprovalEngine;
use crate::atomic_open;
use crate::error_formatter;
use crate::error_formatter::ErrorShape;
use crate::gate_config::GateConfig;
use crate::prompter::GatePrompter;
use crate::protected_files::ProtectedFilesCache;
use crate::tool_registry::ToolRegistry;
use crate::types::ApprovalResult;
use crate::types::GateCategory;
use crate::types::ToolCall;
use crate::types::ToolResult;
use crate::types::VerifiedFileMode;
use crate::verified_file_context;

const FILE_READ_TOOLS: &[&str] = &["read_file", "file_info"];
const FILE_WRITE_TOOLS: &[&str] = &["write_file", "append_file", "apply_delta"];

fn file_mode_for(tool_name: &str) -> Option<VerifiedFileMode> {
    match tool_name {
        "read_file" | "file_info" => Some(VerifiedFileMode::Read),
        "write_file" => Some(VerifiedFileMode::Write),
        "append_file" => Some(VerifiedFileMode::Append),
        "apply_delta" => Some(VerifiedFileMode::ReadWrite),
        _ => None,
    }
}

/// Machine-readable progress events emitted to stdout, one JSON object per
/// line (`spec.md` §6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    ToolStart { id: String, tool: String },
    ToolResult { id: String, tool: String, success: bool },
    ToolDenied { id: String, tool: String, reason: String },
    BatchInterrupted { completed: usize, total: usize },
}

pub struct BatchExecutor<'a> {
    pub config: &'a mut GateConfig,
    pub prompter: Option<&'a GatePrompter>,
    pub subagent_channel: Option<&'a mut SubagentChannel>,
    /// The parent's fan-in over its own spawned subagents' approval
    /// channels, drained once per batch step alongside `new_subagent_channels`
    /// (`spec.md` §4.11). Not to be confused with `subagent_channel`, which
    /// is this process's *own* upward channel when it's itself a subagent.
    pub multiplexer: Option<&'a mut ApprovalMultiplexer>,
    /// Pulls in any subagent pipe ends registered since the last call (see
    /// `ralph-tools`'s `subagent::take_pending_channels`), for folding into
    /// `multiplexer`. Kept as an injected hook rather than a direct
    /// dependency so this crate doesn't need to depend on `ralph-tools`.
    new_subagent_channels: Option<Box<dyn FnMut() -> Vec<PendingChannel> + 'a>>,
    pub protected_files: &'a ProtectedFilesCache,
    pub registry: &'a ToolRegistry,
    pub cancelled: &'a AtomicBool,
    /// Compact mode (`spec.md` §6 `--compact`-equivalent): identical
    /// tool+arguments calls within one batch reuse the first result instead
    /// of re-running (and re-approving) the duplicate.
    pub compact: bool,
    pub max_subagents: usize,
    subagent_count: usize,
    last_outcome: Option<ApprovalResult>,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(
        config: &'a mut GateConfig,
        protected_files: &'a ProtectedFilesCache,
        registry: &'a ToolRegistry,
        cancelled: &'a AtomicBool,
    ) -> Self {
        Self {
            config,
            prompter: None,
            subagent_channel: None,
            multiplexer: None,
            new_subagent_channels: None,
            protected_files,
            registry,
            cancelled,
            compact: false,
            max_subagents: 8,
            subagent_count: 0,
            last_outcome: None,
        }
    }

    pub fn with_prompter(mut self, prompter: &'a GatePrompter) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn with_compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    pub fn with_multiplexer(mut self, multiplexer: &'a mut ApprovalMultiplexer) -> Self {
        self.multiplexer = Some(multiplexer);
        self
    }

    /// Wires a hook that collects newly spawned subagents' `PendingChannel`s
    /// so `service_subagent_requests` can fold them into `multiplexer`
    /// without this crate depending on `ralph-tools`.
    pub fn with_new_subagent_channels(mut self, hook: impl FnMut() -> Vec<PendingChannel> + 'a) -> Self {
        self.new_subagent_channels = Some(Box::new(hook));
        self
    }

    /// Pulls in any pending subagent channels and answers whatever approval
    /// requests are already waiting on them, so a forwarded prompt doesn't
    /// sit unanswered for the length of an entire batch (`spec.md` §4.11).
    /// A no-op once neither a multiplexer nor a collection hook is wired.
    fn service_subagent_requests(&mut self) {
        if let Some(hook) = self.new_subagent_channels.as_mut() {
            let new_channels = hook();
            if let Some(multiplexer) = self.multiplexer.as_deref_mut() {
                for channel in new_channels {
                    multiplexer.register(channel);
                }
            }
        }

        let Some(multiplexer) = self.multiplexer.as_deref_mut() else {
            return;
        };
        let mut engine = ApprovalEngine::new(self.config);
        if let Some(prompter) = self.prompter {
            engine = engine.with_prompter(prompter);
        }
        while matches!(engine.drain_one_subagent_request(multiplexer), Ok(true)) {}
    }

    /// Runs every call in `batch` in order, emitting one [`BatchEvent`] per
    /// step through `emit`. Stops early (filling the remainder with an
    /// `interrupted` result) on cooperative cancellation or an aborted
    /// prompt (`spec.md` §4.13).
    pub fn execute_batch(&mut self, batch: &[ToolCall], mut emit: impl FnMut(&BatchEvent)) -> Vec<ToolResult> {
        self.protected_files.force_refresh();

        let precomputed = self.precompute_approvals(batch);

        let mut results = Vec::with_capacity(batch.len());
        let mut seen: HashMap<String, ToolResult> = HashMap::new();

        for (idx, call) in batch.iter().enumerate() {
            self.service_subagent_requests();

            if self.cancelled.load(Ordering::SeqCst) {
                let event = BatchEvent::BatchInterrupted {
                    completed: idx,
                    total: batch.len(),
                };
                emit(&event);
                for remaining in &batch[idx..] {
                    results.push(ToolResult::err(remaining.id.clone(), ErrorShape::Interrupted.to_json()));
                }
                return results;
            }

            if self.compact {
                let key = format!("{}:{}", call.name, call.arguments_json);
                if let Some(cached) = seen.get(&key) {
                    results.push(ToolResult {
                        tool_call_id: call.id.clone(),
                        ..cached.clone()
                    });
                    continue;
                }
            }

            emit(&BatchEvent::ToolStart {
                id: call.id.clone(),
                tool: call.name.clone(),
            });

            let result = self.execute_one(idx, call, &precomputed, &mut emit);

            if self.compact {
                let key = format!("{}:{}", call.name, call.arguments_json);
                seen.insert(key, result.clone());
            }

            if matches!(self.last_outcome, Some(ApprovalResult::Aborted)) {
                results.push(result);
                emit(&BatchEvent::BatchInterrupted {
                    completed: idx + 1,
                    total: batch.len(),
                });
                for remaining in &batch[idx + 1..] {
                    results.push(ToolResult::err(remaining.id.clone(), ErrorShape::Aborted.to_json()));
                }
                return results;
            }

            results.push(result);
        }

        // A subagent spawned by the last call in the batch may still have a
        // request waiting; give it one more chance before returning.
        self.service_subagent_requests();

        results
    }

    /// Runs `spec.md` §4.10 `check_batch` once up front over every call that
    /// isn't already short-circuited by a protected-file block or a
    /// compact-mode duplicate, so a multi-call batch gets the batch prompter
    /// UI instead of one single-prompt per call. A subagent-cap rejection
    /// still goes through a decision here even though `execute_one` ends up
    /// discarding it; the cap is rare enough that the occasional wasted
    /// prompt is cheaper than threading cap state into the engine.
    fn precompute_approvals(&mut self, batch: &[ToolCall]) -> HashMap<usize, ApprovalResult> {
        let mut content_first_seen: HashMap<String, usize> = HashMap::new();
        let mut needs_decision: Vec<usize> = Vec::new();

        for (i, call) in batch.iter().enumerate() {
            if self.protected_file_check(call).is_some() {
                continue;
            }
            if self.compact {
                let key = format!("{}:{}", call.name, call.arguments_json);
                if content_first_seen.contains_key(&key) {
                    continue;
                }
                content_first_seen.insert(key, i);
            }
            needs_decision.push(i);
        }

        let decision_calls: Vec<ToolCall> = needs_decision.iter().map(|&i| batch[i].clone()).collect();
        let decisions = {
            let mut engine = ApprovalEngine::new(self.config);
            if let Some(prompter) = self.prompter {
                engine = engine.with_prompter(prompter);
            }
            if let Some(channel) = self.subagent_channel.as_deref_mut() {
                engine = engine.with_subagent_channel(channel);
            }
            engine.check_batch(&decision_calls)
        };

        needs_decision.into_iter().zip(decisions).collect()
    }

    fn execute_one(
        &mut self,
        idx: usize,
        call: &ToolCall,
        precomputed: &HashMap<usize, ApprovalResult>,
        emit: &mut impl FnMut(&BatchEvent),
    ) -> ToolResult {
        self.last_outcome = None;

        if let Some(shape) = self.protected_file_check(call) {
            emit(&BatchEvent::ToolDenied {
                id: call.id.clone(),
                tool: call.name.clone(),
                reason: shape.code().to_string(),
            });
            return ToolResult::err(call.id.clone(), shape.to_json());
        }

        if call.name == "subagent" && self.subagent_count >= self.max_subagents {
            let shape = ErrorShape::DuplicateSubagent { tool: call.name.clone() };
            emit(&BatchEvent::ToolDenied {
                id: call.id.clone(),
                tool: call.name.clone(),
                reason: shape.code().to_string(),
            });
            return ToolResult::err(call.id.clone(), shape.to_json());
        }

        let approval = precomputed
            .get(&idx)
            .copied()
            .unwrap_or(ApprovalResult::NonInteractiveDenied);
        self.last_outcome = Some(approval);

        match approval {
            ApprovalResult::Allowed | ApprovalResult::AllowedAlways => {
                if call.name == "subagent" {
                    self.subagent_count += 1;
                }
                let result = self.dispatch(call);
                emit(&BatchEvent::ToolResult {
                    id: call.id.clone(),
                    tool: call.name.clone(),
                    success: result.success,
                });
                result
            }
            ApprovalResult::Denied => {
                let shape = ErrorShape::OperationDenied { tool: call.name.clone() };
                emit(&BatchEvent::ToolDenied {
                    id: call.id.clone(),
                    tool: call.name.clone(),
                    reason: shape.code().to_string(),
                });
                ToolResult::err(call.id.clone(), shape.to_json())
            }
            ApprovalResult::NonInteractiveDenied => {
                let category = GateCategory::categorize(&call.name).as_str().to_string();
                let shape = ErrorShape::NonInteractiveGate { tool: call.name.clone(), category };
                emit(&BatchEvent::ToolDenied {
                    id: call.id.clone(),
                    tool: call.name.clone(),
                    reason: shape.code().to_string(),
                });
                ToolResult::err(call.id.clone(), shape.to_json())
            }
            ApprovalResult::RateLimited => {
                let shape = ErrorShape::RateLimited {
                    tool: call.name.clone(),
                    retry_after_secs: self.config.rate_limiter.get_remaining(&call.name),
                };
                emit(&BatchEvent::ToolDenied {
                    id: call.id.clone(),
                    tool: call.name.clone(),
                    reason: shape.code().to_string(),
                });
                ToolResult::err(call.id.clone(), shape.to_json())
            }
            ApprovalResult::Aborted => ToolResult::err(call.id.clone(), ErrorShape::Aborted.to_json()),
        }
    }

    /// `spec.md` §4.4: protected-file checks apply to both halves of a
    /// read/write — a protected file must never be read either, since its
    /// contents could otherwise leak back to the model.
    fn protected_file_check(&self, call: &ToolCall) -> Option<ErrorShape> {
        if !FILE_READ_TOOLS.contains(&call.name.as_str()) && !FILE_WRITE_TOOLS.contains(&call.name.as_str()) {
            return None;
        }
        let path = call.argument_str("path")?;
        if self.protected_files.is_protected(&path) {
            Some(ErrorShape::ProtectedFile { path })
        } else {
            None
        }
    }

    fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let Some(executor) = self.registry.get(&call.name) else {
            return ToolResult::err(call.id.clone(), format!(r#"{{"error":"unknown_tool","tool":"{}"}}"#, call.name));
        };

        let Some(mode) = file_mode_for(&call.name) else {
            return executor.execute(call);
        };

        let Some(path) = call.argument_str("path") else {
            return executor.execute(call);
        };

        let approved = match atomic_open::capture(&path) {
            Ok(a) => a,
            Err(e) => {
                let shape = error_formatter::from_verify_error(&e, &path);
                return ToolResult::err(call.id.clone(), shape.to_json());
            }
        };

        if let Err(e) = verified_file_context::set(&approved, mode) {
            let shape = error_formatter::from_verify_error(&e, &path);
            return ToolResult::err(call.id.clone(), shape.to_json());
        }

        let result = executor.execute(call);
        verified_file_context::clear();
        result
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::types::GateAction;
    use crate::types::GateCategory;

    struct Echo;
    impl crate::tool_registry::ToolExecutor for Echo {
        fn execute(&self, call: &ToolCall) -> ToolResult {
            ToolResult::ok(call.id.clone(), "ok".to_string())
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
    fn allowed_category_dispatches_to_registry() {
        let mut config = GateConfig::new();
        let protected = ProtectedFilesCache::with_defaults(vec![]);
        let mut registry = ToolRegistry::new();
        registry.register("remember", Box::new(Echo));
        let cancelled = AtomicBool::new(false);

        let mut executor = BatchExecutor::new(&mut config, &protected, &registry, &cancelled);
        let results = executor.execute_batch(&[call("1", "remember", "{}")], |_| {});
        assert!(results[0].success);
    }

    #[test]
    fn gated_without_prompter_is_denied() {
        let mut config = GateConfig::new();
        let protected = ProtectedFilesCache::with_defaults(vec![]);
        let registry = ToolRegistry::new();
        let cancelled = AtomicBool::new(false);

        let mut executor = BatchExecutor::new(&mut config, &protected, &registry, &cancelled);
        let results = executor.execute_batch(&[call("1", "shell", r#"{"command":"git status"}"#)], |_| {});
        assert!(!results[0].success);
        assert!(results[0].result.contains("non_interactive_gate"));
    }

    #[test]
    fn protected_file_write_is_blocked_before_approval() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "SECRET=1").unwrap();

        let mut config = GateConfig::new();
        config.categories.insert(GateCategory::FileWrite, GateAction::Allow);
        let protected = ProtectedFilesCache::with_defaults(vec![env_path.to_string_lossy().to_string()]);
        let registry = ToolRegistry::new();
        let cancelled = AtomicBool::new(false);

        let args = format!(r#"{{"path":"{}"}}"#, env_path.to_string_lossy().replace('\\', "\\\\"));
        let mut executor = BatchExecutor::new(&mut config, &protected, &registry, &cancelled);
        let results = executor.execute_batch(&[call("1", "write_file", &args)], |_| {});
        assert!(!results[0].success);
        assert!(results[0].result.contains("protected_file"));
    }

    #[test]
    fn cancelled_flag_interrupts_remaining_calls() {
        let mut config = GateConfig::new();
        let protected = ProtectedFilesCache::with_defaults(vec![]);
        let mut registry = ToolRegistry::new();
        registry.register("remember", Box::new(Echo));
        let cancelled = AtomicBool::new(true);

        let mut executor = BatchExecutor::new(&mut config, &protected, &registry, &cancelled);
        let results = executor.execute_batch(
            &[call("1", "remember", "{}"), call("2", "remember", "{}")],
            |_| {},
        );
        assert_eq!(results.len(), 2);
        assert!(results[0].result.contains("interrupted"));
    }

    #[test]
    fn compact_mode_reuses_duplicate_result() {
        let mut config = GateConfig::new();
        let protected = ProtectedFilesCache::with_defaults(vec![]);
        let mut registry = ToolRegistry::new();
        registry.register("remember", Box::new(Echo));
        let cancelled = AtomicBool::new(false);

        let mut executor = BatchExecutor::new(&mut config, &protected, &registry, &cancelled).with_compact(true);
        let results = executor.execute_batch(
            &[call("1", "remember", "{}"), call("2", "remember", "{}")],
            |_| {},
        );
        assert_eq!(results[0].result, results[1].result);
        assert_eq!(results[1].tool_call_id, "2");
    }
}
