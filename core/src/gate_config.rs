//! Gate configuration: category policy, enabled flag, allowlist ownership
//! (`spec.md` §3 `GateConfig`, §4.8).

use std::collections::HashMap;
use std::io::IsTerminal;

use crate::allowlist::Allowlist;
use crate::rate_limiter::RateLimiter;
use crate::types::GateAction;
use crate::types::GateCategory;
use crate::types::ShellType;

pub struct GateConfig {
    pub enabled: bool,
    pub is_interactive: bool,
    pub categories: HashMap<GateCategory, GateAction>,
    pub allowlist: Allowlist,
    pub rate_limiter: RateLimiter,
    /// Set on subagents only; carried as a plain flag here, the actual
    /// channel object lives alongside the config in the executor because it
    /// owns OS resources the config's value semantics shouldn't.
    pub is_subagent: bool,
}

/// `spec.md` §4.8 defaults.
pub fn default_categories() -> HashMap<GateCategory, GateAction> {
    use GateAction::*;
    use GateCategory::*;
    HashMap::from([
        (FileRead, Allow),
        (FileWrite, Gate),
        (Shell, Gate),
        (Network, Gate),
        (Memory, Allow),
        (Subagent, Gate),
        (Mcp, Gate),
        (Python, Allow),
    ])
}

impl GateConfig {
    pub fn new() -> Self {
        Self {
            enabled: true,
            is_interactive: std::io::stdin().is_terminal(),
            categories: default_categories(),
            allowlist: Allowlist::new(),
            rate_limiter: RateLimiter::new(),
            is_subagent: false,
        }
    }

    pub fn action_for(&self, category: GateCategory) -> GateAction {
        self.categories
            .get(&category)
            .copied()
            .unwrap_or(GateAction::Gate)
    }

    /// Deep-copies a child config for a spawned subagent (`spec.md` §4.8):
    /// enabled/categories copy fully, but only the allowlist entries below
    /// the static boundary propagate. Session entries never reach a child.
    pub fn init_from_parent(parent: &GateConfig) -> Self {
        Self {
            enabled: parent.enabled,
            is_interactive: parent.is_interactive,
            categories: parent.categories.clone(),
            allowlist: parent.allowlist.clone_static_only(),
            rate_limiter: RateLimiter::new(),
            is_subagent: true,
        }
    }

    /// `--yolo`: disable all gates.
    pub fn apply_yolo(&mut self) {
        self.enabled = false;
    }

    /// `--allow-category=<name>`.
    pub fn apply_allow_category(&mut self, name: &str) {
        if let Some(category) = GateCategory::parse(name) {
            self.categories.insert(category, GateAction::Allow);
        } else {
            tracing::warn!(category = name, "unknown gate category in --allow-category");
        }
    }

    /// `--allow "<tool>:<spec>"`: for `tool == "shell"`, `<spec>` is a
    /// comma-separated token list; otherwise it's a regex pattern.
    pub fn apply_allow_arg(&mut self, arg: &str) {
        let Some((tool, spec)) = arg.split_once(':') else {
            tracing::warn!(arg, "malformed --allow argument, expected tool:spec");
            return;
        };
        if tool == "shell" {
            let tokens: Vec<String> = spec.split(',').map(|s| s.trim().to_string()).collect();
            self.allowlist.push_session_shell(tokens, None);
        } else {
            self.allowlist.push_session_regex(tool, spec);
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// `spec.md` §6 JSON config shape, deserialized straight off the wire before
/// being folded into a [`GateConfig`].
pub mod file_format {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct ConfigFile {
        pub approval_gates: Option<ApprovalGates>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ApprovalGates {
        #[serde(default = "default_true")]
        pub enabled: bool,
        #[serde(default)]
        pub categories: std::collections::HashMap<String, String>,
        #[serde(default)]
        pub allowlist: Vec<AllowlistEntryFile>,
    }

    fn default_true() -> bool {
        true
    }

    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    pub enum AllowlistEntryFile {
        Regex { tool: String, pattern: String },
        Shell {
            tool: String,
            command: Vec<String>,
            shell: Option<String>,
        },
    }
}

/// Loads and applies `spec.md` §6's JSON config onto a fresh [`GateConfig`].
/// Malformed JSON falls through to defaults; unknown categories and
/// unparseable regexes are skipped with a warning (`spec.md` §7).
pub fn apply_config_file(config: &mut GateConfig, contents: &str) {
    let parsed: file_format::ConfigFile = match serde_json::from_str(contents) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "malformed ralph.config.json, using defaults");
            return;
        }
    };

    let Some(gates) = parsed.approval_gates else {
        return;
    };

    config.enabled = gates.enabled;

    for (name, action) in gates.categories {
        let Some(category) = GateCategory::parse(&name) else {
            tracing::warn!(category = name, "unknown gate category in config, skipping");
            continue;
        };
        let action = match action.as_str() {
            "allow" => GateAction::Allow,
            "gate" => GateAction::Gate,
            "deny" => GateAction::Deny,
            other => {
                tracing::warn!(action = other, "unknown gate action in config, skipping");
                continue;
            }
        };
        config.categories.insert(category, action);
    }

    for entry in gates.allowlist {
        match entry {
            file_format::AllowlistEntryFile::Regex { tool, pattern } => {
                let compiled = crate::allowlist::RegexEntry::compile(tool, pattern);
                if !compiled.valid {
                    tracing::warn!(pattern = %compiled.pattern_str, "regex failed to compile, skipping");
                }
                config.allowlist.regex_entries.push(compiled);
            }
            file_format::AllowlistEntryFile::Shell {
                tool: _,
                command,
                shell,
            } => {
                let shell_type = shell.as_deref().and_then(parse_shell_type);
                config.allowlist.push_session_shell(command, shell_type);
            }
        }
    }

    config.allowlist.mark_static_boundary();
}

fn parse_shell_type(s: &str) -> Option<ShellType> {
    Some(match s {
        "posix" => ShellType::Posix,
        "cmd" => ShellType::Cmd,
        "powershell" => ShellType::Powershell,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = GateConfig::new();
        assert_eq!(config.action_for(GateCategory::FileRead), GateAction::Allow);
        assert_eq!(config.action_for(GateCategory::FileWrite), GateAction::Gate);
        assert_eq!(config.action_for(GateCategory::Shell), GateAction::Gate);
        assert_eq!(config.action_for(GateCategory::Memory), GateAction::Allow);
        assert!(config.enabled);
    }

    #[test]
    fn yolo_disables_gates() {
        let mut config = GateConfig::new();
        config.apply_yolo();
        assert!(!config.enabled);
    }

    #[test]
    fn allow_category_overrides_default() {
        let mut config = GateConfig::new();
        config.apply_allow_category("shell");
        assert_eq!(config.action_for(GateCategory::Shell), GateAction::Allow);
    }

    #[test]
    fn allow_arg_shell_spec_adds_shell_entry() {
        let mut config = GateConfig::new();
        config.apply_allow_arg("shell:git,status");
        assert_eq!(config.allowlist.shell_entries.len(), 1);
        assert_eq!(
            config.allowlist.shell_entries[0].command_prefix,
            vec!["git".to_string(), "status".to_string()]
        );
    }

    #[test]
    fn allow_arg_regex_spec_adds_regex_entry() {
        let mut config = GateConfig::new();
        config.apply_allow_arg(r#"read_file:^\{"path":"a"\}$"#);
        assert_eq!(config.allowlist.regex_entries.len(), 1);
    }

    #[test]
    fn malformed_json_falls_back_to_defaults() {
        let mut config = GateConfig::new();
        apply_config_file(&mut config, "{not json");
        assert!(config.enabled);
        assert_eq!(config.action_for(GateCategory::Shell), GateAction::Gate);
    }

    #[test]
    fn unknown_category_in_config_is_skipped() {
        let mut config = GateConfig::new();
        apply_config_file(
            &mut config,
            r#"{"approval_gates":{"enabled":true,"categories":{"not_a_category":"allow"}}}"#,
        );
        assert_eq!(config.action_for(GateCategory::Shell), GateAction::Gate);
    }

    #[test]
    fn init_from_parent_copies_only_static_entries() {
        let mut parent = GateConfig::new();
        parent.allowlist.push_session_regex("read_file", "^a$");
        parent.allowlist.mark_static_boundary();
        parent.allowlist.push_session_regex("read_file", "^b$");

        let child = GateConfig::init_from_parent(&parent);
        assert_eq!(child.allowlist.regex_entries.len(), 1);
        assert!(child.is_subagent);
    }
}
