//! Approval engine: the single place that turns a [`ToolCall`] plus a
//! [`GateConfig`] into an [`ApprovalResult`] (`spec.md` §3, §4.10).

use std::collections::HashSet;
use std::time::Duration;

use crate::allowlist::RegexEntry;
use crate::approval_channel::ApprovalMultiplexer;
use crate::approval_channel::ApprovalRequest;
use crate::approval_channel::SubagentChannel;
use crate::error::RalphError;
use crate::gate_config::GateConfig;
use crate::pattern_generator;
use crate::pattern_generator::GeneratedEntry;
use crate::prompter::BatchItemStatus;
use crate::prompter::BatchItemView;
use crate::prompter::BatchKey;
use crate::prompter::GatePrompter;
use crate::prompter::SingleKey;
use crate::prompter::SinglePromptView;
use crate::prompter::interpret_batch_input;
use crate::types::ApprovalResult;
use crate::types::GateAction;
use crate::types::GateCategory;
use crate::types::ToolCall;

/// Borrows everything a single `check` call might need: the config it
/// mutates (rate limiter state, session allowlist growth), an optional
/// interactive prompter, and an optional channel back to the parent when
/// this engine is running inside a subagent (`spec.md` §4.11).
pub struct ApprovalEngine<'a> {
    pub config: &'a mut GateConfig,
    pub prompter: Option<&'a GatePrompter>,
    pub subagent_channel: Option<&'a mut SubagentChannel>,
    pub own_pid: u32,
}

impl<'a> ApprovalEngine<'a> {
    pub fn new(config: &'a mut GateConfig) -> Self {
        Self {
            config,
            prompter: None,
            subagent_channel: None,
            own_pid: std::process::id(),
        }
    }

    pub fn with_prompter(mut self, prompter: &'a GatePrompter) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn with_subagent_channel(mut self, channel: &'a mut SubagentChannel) -> Self {
        self.subagent_channel = Some(channel);
        self
    }

    /// `spec.md` §4.10: the full decision table for one call.
    pub fn check(&mut self, call: &ToolCall) -> ApprovalResult {
        if !self.config.enabled {
            return ApprovalResult::Allowed;
        }

        if self.config.rate_limiter.is_blocked(&call.name) {
            return ApprovalResult::RateLimited;
        }

        let category = GateCategory::categorize(&call.name);
        match self.config.action_for(category) {
            GateAction::Allow => {
                self.config.rate_limiter.reset(&call.name);
                ApprovalResult::Allowed
            }
            GateAction::Deny => {
                self.config.rate_limiter.record_denial(&call.name);
                ApprovalResult::Denied
            }
            GateAction::Gate => self.check_gated(call),
        }
    }

    fn check_gated(&mut self, call: &ToolCall) -> ApprovalResult {
        if self.already_allowlisted(call) {
            self.config.rate_limiter.reset(&call.name);
            return ApprovalResult::Allowed;
        }
        self.resolve_via_channel_or_prompt(call)
    }

    /// The part of `check_gated` that runs once a call is confirmed to need
    /// a human (or proxied-parent) decision: forward over the subagent
    /// channel if one is wired, else fall back to the single-call prompt.
    /// Shared by [`Self::check_gated`] and the batch prompter's per-item
    /// "inspect" path (`spec.md` §4.9 batch mode, `1..N` entry).
    fn resolve_via_channel_or_prompt(&mut self, call: &ToolCall) -> ApprovalResult {
        if let Some(channel) = self.subagent_channel.as_deref_mut() {
            let request = ApprovalRequest {
                id: call.id.clone(),
                tool_name: call.name.clone(),
                rendered: call.arguments_json.clone(),
                arguments_json: call.arguments_json.clone(),
                from_pid: self.own_pid,
            };
            let Ok(()) = channel.send_request(&request) else {
                self.config.rate_limiter.record_denial(&call.name);
                return ApprovalResult::NonInteractiveDenied;
            };
            let result = channel
                .recv_response(&call.id)
                .unwrap_or(ApprovalResult::Denied);
            self.settle(call, result);
            return result;
        }

        let Some(prompter) = self.prompter else {
            self.config.rate_limiter.record_denial(&call.name);
            return ApprovalResult::NonInteractiveDenied;
        };

        let view = SinglePromptView {
            tool_name: &call.name,
            rendered: &call.arguments_json,
            from_pid: None,
        };
        let result = match prompter.prompt_single(&view) {
            SingleKey::Allow => ApprovalResult::Allowed,
            SingleKey::AllowAlways => ApprovalResult::AllowedAlways,
            SingleKey::Deny => ApprovalResult::Denied,
            SingleKey::Aborted => ApprovalResult::Aborted,
            SingleKey::Invalid | SingleKey::Details => ApprovalResult::Denied,
        };
        self.settle(call, result);
        result
    }

    /// Services one pending subagent approval request from `multiplexer`, if
    /// one is ready. This is `resolve_via_channel_or_prompt`'s mirror image:
    /// there the engine is the child forwarding a request up, here it's the
    /// parent reading a forwarded request and answering it through its own
    /// prompter (`spec.md` §4.11). Returns whether a request was drained so
    /// the caller can keep going until the set goes quiet.
    pub fn drain_one_subagent_request(&mut self, multiplexer: &mut ApprovalMultiplexer) -> Result<bool, RalphError> {
        let Some((idx, request)) = multiplexer.poll_next(Duration::from_millis(0))? else {
            return Ok(false);
        };

        let result = match self.prompter {
            Some(prompter) => {
                let view = SinglePromptView {
                    tool_name: &request.tool_name,
                    rendered: &request.rendered,
                    from_pid: Some(request.from_pid),
                };
                match prompter.prompt_single(&view) {
                    SingleKey::Allow => ApprovalResult::Allowed,
                    SingleKey::AllowAlways => ApprovalResult::AllowedAlways,
                    SingleKey::Deny => ApprovalResult::Denied,
                    SingleKey::Aborted => ApprovalResult::Aborted,
                    SingleKey::Invalid | SingleKey::Details => ApprovalResult::Denied,
                }
            }
            // No prompter to forward through (a non-interactive parent): the
            // subagent's own 300s timeout-to-deny would get there eventually,
            // but answering right away keeps a non-interactive run from
            // stalling on it.
            None => ApprovalResult::NonInteractiveDenied,
        };

        if result == ApprovalResult::AllowedAlways {
            let call = ToolCall {
                id: request.id.clone(),
                name: request.tool_name.clone(),
                arguments_json: request.arguments_json.clone(),
            };
            self.remember(&call);
        }

        multiplexer.respond(idx, request.id.clone(), result)?;
        Ok(true)
    }

    /// `spec.md` §4.10 `check_batch`: categorizes every call first (no
    /// prompting), then decides how to resolve whatever's left needing a
    /// human: the single-prompt path when exactly one call is pending, the
    /// batch prompter UI when more than one is, and forwarding-per-request
    /// when running inside a subagent (the parent is the one arbitrating
    /// concurrency, so there's no local batch UI to show here either way).
    pub fn check_batch(&mut self, calls: &[ToolCall]) -> Vec<ApprovalResult> {
        let mut results: Vec<Option<ApprovalResult>> = vec![None; calls.len()];
        let mut pending: Vec<usize> = Vec::new();

        for (i, call) in calls.iter().enumerate() {
            if !self.config.enabled {
                results[i] = Some(ApprovalResult::Allowed);
                continue;
            }
            if self.config.rate_limiter.is_blocked(&call.name) {
                results[i] = Some(ApprovalResult::RateLimited);
                continue;
            }
            let category = GateCategory::categorize(&call.name);
            match self.config.action_for(category) {
                GateAction::Allow => {
                    self.config.rate_limiter.reset(&call.name);
                    results[i] = Some(ApprovalResult::Allowed);
                }
                GateAction::Deny => {
                    self.config.rate_limiter.record_denial(&call.name);
                    results[i] = Some(ApprovalResult::Denied);
                }
                GateAction::Gate => {
                    if self.already_allowlisted(call) {
                        self.config.rate_limiter.reset(&call.name);
                        results[i] = Some(ApprovalResult::Allowed);
                    } else {
                        pending.push(i);
                    }
                }
            }
        }

        if pending.is_empty() {
            return finish(results);
        }

        // A single pending call, or any call proxied through a subagent
        // channel, never needs the multi-item batch UI.
        if pending.len() == 1 || self.subagent_channel.is_some() {
            for &i in &pending {
                results[i] = Some(self.resolve_via_channel_or_prompt(&calls[i]));
            }
            return finish(results);
        }

        let Some(prompter) = self.prompter else {
            for &i in &pending {
                self.config.rate_limiter.record_denial(&calls[i].name);
                results[i] = Some(ApprovalResult::NonInteractiveDenied);
            }
            return finish(results);
        };

        self.run_batch_prompter(prompter, calls, &pending, &mut results);
        finish(results)
    }

    /// `spec.md` §4.9 batch mode: numbered list, `y`/`n` for all-remaining,
    /// `1..N` to inspect (and resolve) one call at a time.
    fn run_batch_prompter(
        &mut self,
        prompter: &GatePrompter,
        calls: &[ToolCall],
        pending: &[usize],
        results: &mut [Option<ApprovalResult>],
    ) {
        let mut statuses: Vec<BatchItemStatus> = vec![BatchItemStatus::Pending; pending.len()];
        let mut open: HashSet<usize> = pending.iter().copied().collect();

        while !open.is_empty() {
            let views: Vec<BatchItemView> = pending
                .iter()
                .enumerate()
                .map(|(pos, &idx)| BatchItemView {
                    tool_name: &calls[idx].name,
                    rendered: &calls[idx].arguments_json,
                    status: statuses[pos],
                })
                .collect();
            prompter.render_batch(&views);

            match read_batch_key(prompter) {
                BatchKey::AllowAll => {
                    for &idx in &open {
                        self.config.rate_limiter.reset(&calls[idx].name);
                        results[idx] = Some(ApprovalResult::Allowed);
                    }
                    open.clear();
                }
                BatchKey::DenyAll => {
                    for &idx in &open {
                        self.config.rate_limiter.record_denial(&calls[idx].name);
                        results[idx] = Some(ApprovalResult::Denied);
                    }
                    open.clear();
                }
                BatchKey::Inspect(n) => {
                    let Some(&idx) = pending.get(n - 1) else {
                        continue;
                    };
                    if !open.contains(&idx) {
                        continue;
                    }
                    let result = self.resolve_via_channel_or_prompt(&calls[idx]);
                    if let Some(pos) = pending.iter().position(|&p| p == idx) {
                        statuses[pos] = if matches!(
                            result,
                            ApprovalResult::Denied | ApprovalResult::NonInteractiveDenied
                        ) {
                            BatchItemStatus::Denied
                        } else {
                            BatchItemStatus::Allowed
                        };
                    }
                    open.remove(&idx);
                    results[idx] = Some(result);
                    if result == ApprovalResult::Aborted {
                        for &rest in &open {
                            results[rest] = Some(ApprovalResult::Aborted);
                        }
                        open.clear();
                    }
                }
                BatchKey::Aborted => {
                    for &idx in &open {
                        results[idx] = Some(ApprovalResult::Aborted);
                    }
                    open.clear();
                }
                BatchKey::Invalid => {}
            }
        }
    }

    /// Applies the side effects of a gated decision: reset-or-record on the
    /// rate limiter, and pattern generation into the session allowlist when
    /// the caller chose "always" (`spec.md` §4.7).
    fn settle(&mut self, call: &ToolCall, result: ApprovalResult) {
        match result {
            ApprovalResult::Allowed => {
                self.config.rate_limiter.reset(&call.name);
            }
            ApprovalResult::AllowedAlways => {
                self.config.rate_limiter.reset(&call.name);
                self.remember(call);
            }
            ApprovalResult::Denied | ApprovalResult::NonInteractiveDenied => {
                self.config.rate_limiter.record_denial(&call.name);
            }
            ApprovalResult::RateLimited | ApprovalResult::Aborted => {}
        }
    }

    fn remember(&mut self, call: &ToolCall) {
        let generated = pattern_generator::generate(call);
        if generated.needs_confirmation && !self.confirm_generalization(&generated.example_matches) {
            return;
        }
        match generated.entry {
            GeneratedEntry::Regex { tool, pattern } => {
                self.config.allowlist.regex_entries.push(RegexEntry::compile(tool, pattern));
            }
            GeneratedEntry::Shell { command_prefix, shell_type } => {
                self.config.allowlist.push_session_shell(command_prefix, shell_type);
            }
            GeneratedEntry::ExactOnly => {
                // Unsafe shell input: nothing durable to remember, the
                // exact call itself was already allowed this once.
            }
        }
    }

    /// `spec.md` §4.10 step 7: a generalized pattern (as opposed to an exact
    /// match) is only persisted once the human confirms the examples it
    /// would also match. Without a prompter to ask there's no way to get
    /// that confirmation, so the generalization is skipped rather than
    /// assumed.
    fn confirm_generalization(&self, example_matches: &[String]) -> bool {
        let Some(prompter) = self.prompter else {
            return false;
        };
        let examples = example_matches.join(", ");
        prompter.confirm(&format!("remember this pattern? it would also match: {examples}"))
    }

    fn already_allowlisted(&self, call: &ToolCall) -> bool {
        if call.name == "shell" {
            return self.config.allowlist.matches_shell(call);
        }
        self.config.allowlist.matches_regex(call, None)
    }
}

/// Unwraps every slot filled in by `check_batch`'s categorization pass and
/// whichever resolution path ran afterward. Every slot is guaranteed to be
/// `Some` by the time this runs; the fallback only guards against a future
/// bug silently dropping an index rather than a real runtime case.
fn finish(results: Vec<Option<ApprovalResult>>) -> Vec<ApprovalResult> {
    results
        .into_iter()
        .map(|r| r.unwrap_or(ApprovalResult::NonInteractiveDenied))
        .collect()
}

/// Reads one batch-mode key, accumulating digits for multi-digit `1..N`
/// entry before handing the buffer plus terminator to
/// [`interpret_batch_input`].
fn read_batch_key(prompter: &GatePrompter) -> BatchKey {
    let mut buffer = String::new();
    loop {
        match prompter.read_key_timeout(60_000) {
            Ok(Some(b)) => {
                if b == 3 || b == 4 {
                    return BatchKey::Aborted;
                }
                if b.is_ascii_digit() {
                    buffer.push(b as char);
                    continue;
                }
                if buffer.is_empty() {
                    return interpret_batch_input("", Some(b));
                }
                return interpret_batch_input(&buffer, None);
            }
            Ok(None) => {
                return if buffer.is_empty() {
                    BatchKey::Invalid
                } else {
                    interpret_batch_input(&buffer, None)
                };
            }
            Err(_) => return BatchKey::Aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn call(name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: "c1".to_string(),
            name: name.to_string(),
            arguments_json: args.to_string(),
        }
    }

    #[test]
    fn allow_category_never_gates() {
        let mut config = GateConfig::new();
        let mut engine = ApprovalEngine::new(&mut config);
        let result = engine.check(&call("read_file", r#"{"path":"README.md"}"#));
        assert_eq!(result, ApprovalResult::Allowed);
    }

    #[test]
    fn gate_without_prompter_is_non_interactive_denied() {
        let mut config = GateConfig::new();
        let mut engine = ApprovalEngine::new(&mut config);
        let result = engine.check(&call("shell", r#"{"command":"git status"}"#));
        assert_eq!(result, ApprovalResult::NonInteractiveDenied);
    }

    #[test]
    fn yolo_disables_all_gates() {
        let mut config = GateConfig::new();
        config.apply_yolo();
        let mut engine = ApprovalEngine::new(&mut config);
        let result = engine.check(&call("shell", r#"{"command":"git status"}"#));
        assert_eq!(result, ApprovalResult::Allowed);
    }

    #[test]
    fn repeated_denials_trigger_rate_limit() {
        let mut config = GateConfig::new();
        for _ in 0..3 {
            let mut engine = ApprovalEngine::new(&mut config);
            engine.check(&call("shell", r#"{"command":"git status"}"#));
        }
        let mut engine = ApprovalEngine::new(&mut config);
        let result = engine.check(&call("shell", r#"{"command":"git status"}"#));
        assert_eq!(result, ApprovalResult::RateLimited);
    }

    #[test]
    fn preexisting_allowlist_entry_skips_gate() {
        let mut config = GateConfig::new();
        config.allowlist.push_session_shell(vec!["git".to_string(), "status".to_string()], None);
        let mut engine = ApprovalEngine::new(&mut config);
        let result = engine.check(&call("shell", r#"{"command":"git status -s"}"#));
        assert_eq!(result, ApprovalResult::Allowed);
    }

    #[test]
    fn deny_category_denies_without_prompt() {
        let mut config = GateConfig::new();
        config.categories.insert(GateCategory::Shell, GateAction::Deny);
        let mut engine = ApprovalEngine::new(&mut config);
        let result = engine.check(&call("shell", r#"{"command":"git status"}"#));
        assert_eq!(result, ApprovalResult::Denied);
    }

    #[test]
    fn check_batch_resolves_allowed_and_denied_calls_without_a_pending_gate() {
        let mut config = GateConfig::new();
        config.categories.insert(GateCategory::Shell, GateAction::Deny);
        let mut engine = ApprovalEngine::new(&mut config);
        let calls = vec![
            call("read_file", r#"{"path":"README.md"}"#),
            call("shell", r#"{"command":"git status"}"#),
        ];
        let results = engine.check_batch(&calls);
        assert_eq!(results, vec![ApprovalResult::Allowed, ApprovalResult::Denied]);
    }

    #[test]
    fn check_batch_with_no_prompter_denies_every_pending_gate_non_interactively() {
        let mut config = GateConfig::new();
        let mut engine = ApprovalEngine::new(&mut config);
        let calls = vec![
            call("shell", r#"{"command":"git status"}"#),
            call("shell", r#"{"command":"git log"}"#),
        ];
        let results = engine.check_batch(&calls);
        assert_eq!(
            results,
            vec![ApprovalResult::NonInteractiveDenied, ApprovalResult::NonInteractiveDenied]
        );
    }

    #[test]
    fn check_batch_skips_already_allowlisted_calls() {
        let mut config = GateConfig::new();
        config.allowlist.push_session_shell(vec!["git".to_string(), "status".to_string()], None);
        let mut engine = ApprovalEngine::new(&mut config);
        let calls = vec![
            call("shell", r#"{"command":"git status"}"#),
            call("shell", r#"{"command":"git push"}"#),
        ];
        let results = engine.check_batch(&calls);
        assert_eq!(results[0], ApprovalResult::Allowed);
        assert_eq!(results[1], ApprovalResult::NonInteractiveDenied);
    }

    #[test]
    fn remember_skips_a_generalized_pattern_without_a_prompter_to_confirm_it() {
        let mut config = GateConfig::new();
        let mut engine = ApprovalEngine::new(&mut config);
        // Two-token shell command: `pattern_generator` marks this
        // `needs_confirmation`, and there's no prompter wired here to grant
        // it, so nothing should land in the allowlist.
        engine.remember(&call("shell", r#"{"command":"git status"}"#));
        assert!(config.allowlist.shell_entries.is_empty());
    }

    #[test]
    fn remember_persists_an_exact_match_without_needing_confirmation() {
        let mut config = GateConfig::new();
        let mut engine = ApprovalEngine::new(&mut config);
        // A single-token shell command is an exact match, not generalized,
        // so it's remembered unconditionally.
        engine.remember(&call("shell", r#"{"command":"ls"}"#));
        assert_eq!(config.allowlist.shell_entries.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn drain_one_subagent_request_denies_without_a_prompter_to_forward_through() {
        use std::os::unix::io::FromRawFd;

        use crate::approval_channel::ApprovalMultiplexer;
        use crate::approval_channel::ApprovalRequest;
        use crate::approval_channel::PendingChannel;
        use crate::approval_channel::SubagentChannel;

        fn pipe_pair() -> (std::fs::File, std::fs::File) {
            let mut fds = [0i32; 2];
            let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
            assert_eq!(rc, 0);
            unsafe { (std::fs::File::from_raw_fd(fds[0]), std::fs::File::from_raw_fd(fds[1])) }
        }

        let (req_rx, req_tx) = pipe_pair();
        let (resp_rx, resp_tx) = pipe_pair();
        let mut child = SubagentChannel::new(req_tx, resp_rx);
        let mut multiplexer = ApprovalMultiplexer::new();
        multiplexer.register(PendingChannel {
            subagent_pid: 99,
            request_rx: req_rx,
            response_tx: resp_tx,
        });

        child
            .send_request(&ApprovalRequest {
                id: "r1".to_string(),
                tool_name: "shell".to_string(),
                rendered: "git status".to_string(),
                arguments_json: r#"{"command":"git status"}"#.to_string(),
                from_pid: 99,
            })
            .unwrap();

        let mut config = GateConfig::new();
        let mut engine = ApprovalEngine::new(&mut config);
        let drained = engine.drain_one_subagent_request(&mut multiplexer).unwrap();
        assert!(drained);

        let result = child.recv_response("r1").unwrap();
        assert_eq!(result, ApprovalResult::NonInteractiveDenied);
    }

    #[test]
    fn check_batch_empty_slice_returns_empty_vec() {
        let mut config = GateConfig::new();
        let mut engine = ApprovalEngine::new(&mut config);
        assert!(engine.check_batch(&[]).is_empty());
    }
}
