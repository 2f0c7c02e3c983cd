//! Allowlist: regex entries and shell-prefix entries (`spec.md` §3, §4.6).

use regex_lite::Regex;

use crate::shell_parser;
use crate::shell_parser::ParsedShellCommand;
use crate::types::ShellType;
use crate::types::ToolCall;

#[derive(Debug, Clone)]
pub struct RegexEntry {
    pub tool: String,
    pub pattern_str: String,
    compiled: Option<Regex>,
    pub valid: bool,
}

impl RegexEntry {
    pub fn compile(tool: impl Into<String>, pattern_str: impl Into<String>) -> Self {
        let pattern_str = pattern_str.into();
        match Regex::new(&pattern_str) {
            Ok(re) => Self {
                tool: tool.into(),
                pattern_str,
                compiled: Some(re),
                valid: true,
            },
            Err(_) => Self {
                tool: tool.into(),
                pattern_str,
                compiled: None,
                valid: false,
            },
        }
    }
}

/// `command_prefix` is the exact leading tokens. `shell_type: None` means
/// shell-agnostic (eligible for command-equivalence matching).
#[derive(Debug, Clone)]
pub struct ShellEntry {
    pub command_prefix: Vec<String>,
    pub shell_type: Option<ShellType>,
}

#[derive(Default)]
pub struct Allowlist {
    pub regex_entries: Vec<RegexEntry>,
    pub shell_entries: Vec<ShellEntry>,
    pub static_regex_count: usize,
    pub static_shell_count: usize,
}

impl Allowlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once after loading static entries from config, before any
    /// session ("allow always") entries are appended.
    pub fn mark_static_boundary(&mut self) {
        self.static_regex_count = self.regex_entries.len();
        self.static_shell_count = self.shell_entries.len();
    }

    pub fn push_session_regex(&mut self, tool: impl Into<String>, pattern: impl Into<String>) {
        self.regex_entries.push(RegexEntry::compile(tool, pattern));
    }

    pub fn push_session_shell(&mut self, command_prefix: Vec<String>, shell_type: Option<ShellType>) {
        self.shell_entries.push(ShellEntry {
            command_prefix,
            shell_type,
        });
    }

    /// Deep-copies only the static entries, recompiling regexes. Used by
    /// `GateConfig::init_from_parent` (`spec.md` §4.8). Entries whose regex
    /// fails to recompile are kept with `valid = false` and simply never
    /// match (`spec.md` §9: keep-and-skip is the chosen strategy).
    pub fn clone_static_only(&self) -> Self {
        let regex_entries = self.regex_entries[..self.static_regex_count]
            .iter()
            .map(|e| RegexEntry::compile(e.tool.clone(), e.pattern_str.clone()))
            .collect();
        let shell_entries = self.shell_entries[..self.static_shell_count].to_vec();

        let mut clone = Self {
            regex_entries,
            shell_entries,
            static_regex_count: 0,
            static_shell_count: 0,
        };
        clone.mark_static_boundary();
        clone
    }

    /// §4.6: pick the entry whose `tool` equals the call's name, extract
    /// the match target, and test with an ERE-style regex.
    ///
    /// `match_field` is the argument name a Python tool's `Match:` directive
    /// names; `None` means match against the whole `arguments_json`.
    pub fn matches_regex(&self, call: &ToolCall, match_field: Option<&str>) -> bool {
        let target = match match_field {
            Some(field) => call.argument_str(field).unwrap_or_default(),
            None => call.arguments_json.clone(),
        };
        self.regex_entries
            .iter()
            .filter(|e| e.tool == call.name && e.valid)
            .any(|e| e.compiled.as_ref().is_some_and(|re| re.is_match(&target)))
    }

    /// §4.6: extract `arguments.command`, parse it, and try each shell
    /// entry. Returns `false` immediately if the command isn't safe to
    /// match against (chains/pipes/subshells/redirects/dangerous).
    pub fn matches_shell(&self, call: &ToolCall) -> bool {
        let Some(command) = call.argument_str("command") else {
            return false;
        };
        let shell_type = shell_parser::detect_shell_type();
        let Ok(parsed) = shell_parser::parse(&command, shell_type) else {
            return false;
        };
        if !parsed.eligible_for_allowlist() {
            return false;
        }
        self.shell_entries.iter().any(|entry| self.shell_entry_matches(entry, &parsed))
    }

    fn shell_entry_matches(&self, entry: &ShellEntry, parsed: &ParsedShellCommand) -> bool {
        if let Some(entry_shell) = entry.shell_type {
            if entry_shell != parsed.shell_type {
                return false;
            }
            return shell_parser::matches_prefix(parsed, &entry.command_prefix);
        }

        // Shell-agnostic entry.
        if shell_parser::matches_prefix(parsed, &entry.command_prefix) {
            return true;
        }

        let Some(first_token) = parsed.tokens.first() else {
            return false;
        };
        let Some(entry_first) = entry.command_prefix.first() else {
            return false;
        };
        if !shell_parser::commands_are_equivalent(entry_first, first_token) {
            return false;
        }

        if entry.command_prefix.len() == 1 {
            return true;
        }

        // Multi-token shell-agnostic entry: remaining tokens must match
        // exactly (only the base command is allowed to vary by equivalence).
        let rest_entry = &entry.command_prefix[1..];
        if parsed.tokens.len() < entry.command_prefix.len() {
            return false;
        }
        parsed.tokens[1..entry.command_prefix.len()] == *rest_entry
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
    fn regex_entry_matches_own_tool_only() {
        let mut list = Allowlist::new();
        list.push_session_regex("read_file", r#"^\{"path":"README.md"\}$"#);
        assert!(list.matches_regex(&call("read_file", r#"{"path":"README.md"}"#), None));
        assert!(!list.matches_regex(&call("write_file", r#"{"path":"README.md"}"#), None));
    }

    #[test]
    fn shell_exact_prefix_matches() {
        let mut list = Allowlist::new();
        list.push_session_shell(vec!["git".to_string(), "status".to_string()], None);
        assert!(list.matches_shell(&call("shell", r#"{"command":"git status -s"}"#)));
    }

    #[test]
    fn shell_injected_command_never_matches() {
        let mut list = Allowlist::new();
        list.push_session_shell(vec!["git".to_string(), "status".to_string()], None);
        assert!(!list.matches_shell(&call(
            "shell",
            r#"{"command":"git status; rm -rf /"}"#
        )));
    }

    #[test]
    fn shell_agnostic_single_token_equivalence() {
        let mut list = Allowlist::new();
        list.push_session_shell(vec!["ls".to_string()], None);
        assert!(list.matches_shell(&call("shell", r#"{"command":"dir"}"#)));
    }

    #[test]
    fn shell_agnostic_multi_token_requires_exact_rest() {
        let mut list = Allowlist::new();
        list.push_session_shell(vec!["rm".to_string(), "-rf".to_string(), "build".to_string()], None);
        // "del" is equivalent to "rm", but rest must match exactly.
        assert!(list.matches_shell(&call("shell", r#"{"command":"del -rf build"}"#)));
        assert!(!list.matches_shell(&call("shell", r#"{"command":"del -rf other"}"#)));
    }

    #[test]
    fn static_boundary_survives_session_append() {
        let mut list = Allowlist::new();
        list.push_session_regex("read_file", "^a$");
        list.mark_static_boundary();
        list.push_session_regex("read_file", "^b$");
        assert_eq!(list.static_regex_count, 1);

        let clone = list.clone_static_only();
        assert_eq!(clone.regex_entries.len(), 1);
        assert_eq!(clone.regex_entries[0].pattern_str, "^a$");
    }

    #[test]
    fn invalid_regex_is_marked_and_skipped() {
        let entry = RegexEntry::compile("shell", "(unterminated");
        assert!(!entry.valid);
    }
}
