//! Synthesizes an "allow always" allowlist entry from a tool call
//! (`spec.md` §3 `ApprovalResult::AllowedAlways`, §4.7).

use crate::shell_parser;
use crate::shell_parser::ParsedShellCommand;
use crate::types::ShellType;
use crate::types::ToolCall;

pub enum GeneratedEntry {
    Regex {
        tool: String,
        pattern: String,
    },
    Shell {
        command_prefix: Vec<String>,
        shell_type: Option<ShellType>,
    },
    /// No pattern is possible; only this exact command can ever be
    /// approved (unsafe shell input).
    ExactOnly,
}

pub struct GeneratedPattern {
    pub entry: GeneratedEntry,
    pub is_exact_match: bool,
    pub needs_confirmation: bool,
    pub example_matches: Vec<String>,
}

pub fn generate(call: &ToolCall) -> GeneratedPattern {
    match call.name.as_str() {
        "shell" => generate_shell(call),
        "web_fetch" => generate_network(call),
        "read_file" | "file_info" | "write_file" | "append_file" | "apply_delta" => {
            generate_file(call)
        }
        _ => generate_exact_arguments(call),
    }
}

fn generate_file(call: &ToolCall) -> GeneratedPattern {
    let Some(path) = call.argument_str("path") else {
        return generate_exact_arguments(call);
    };

    if path.starts_with('/') && !path.starts_with("/tmp/") || is_root_level(&path) {
        return exact_path_pattern(call, &path);
    }
    if path.starts_with("/tmp/") {
        return exact_path_pattern(call, &path);
    }

    let (dir, basename) = split_dir_basename(&path);
    let Some(ext_idx) = basename.rfind('.') else {
        return exact_path_pattern(call, &path);
    };
    let ext = &basename[ext_idx..];

    let mut examples = vec![
        format!("{dir}/example{ext}"),
        format!("{dir}/other{ext}"),
        format!("{dir}/file{ext}"),
    ];

    let pattern = if basename.starts_with('_') {
        let prefix_end = basename.find('_').map(|i| i + 1).unwrap_or(0);
        let prefix = &basename[..prefix_end];
        examples[0] = format!("{dir}/{prefix}example{ext}");
        format!("^{}/{}.*{}$", escape_regex(&dir), escape_regex(prefix), escape_regex(ext))
    } else {
        format!("^{}/.*{}$", escape_regex(&dir), escape_regex(ext))
    };

    GeneratedPattern {
        entry: GeneratedEntry::Regex {
            tool: call.name.clone(),
            pattern,
        },
        is_exact_match: false,
        needs_confirmation: true,
        example_matches: examples,
    }
}

fn is_root_level(path: &str) -> bool {
    let trimmed = path.trim_start_matches('/');
    !trimmed.contains('/')
}

fn exact_path_pattern(call: &ToolCall, path: &str) -> GeneratedPattern {
    GeneratedPattern {
        entry: GeneratedEntry::Regex {
            tool: call.name.clone(),
            pattern: format!("^{}$", escape_regex(path)),
        },
        is_exact_match: true,
        needs_confirmation: false,
        example_matches: vec![path.to_string()],
    }
}

fn split_dir_basename(path: &str) -> (String, String) {
    match path.rfind('/') {
        Some(idx) => (path[..idx].to_string(), path[idx + 1..].to_string()),
        None => (".".to_string(), path.to_string()),
    }
}

fn generate_shell(call: &ToolCall) -> GeneratedPattern {
    let Some(command) = call.argument_str("command") else {
        return generate_exact_arguments(call);
    };
    let shell_type = shell_parser::detect_shell_type();
    let Ok(parsed) = shell_parser::parse(&command, shell_type) else {
        return unsafe_shell_pattern();
    };
    if !parsed.eligible_for_allowlist() {
        return unsafe_shell_pattern();
    }
    shell_pattern_from_tokens(&parsed)
}

fn shell_pattern_from_tokens(parsed: &ParsedShellCommand) -> GeneratedPattern {
    if parsed.tokens.is_empty() {
        return unsafe_shell_pattern();
    }
    if parsed.tokens.len() == 1 {
        return GeneratedPattern {
            entry: GeneratedEntry::Shell {
                command_prefix: parsed.tokens.clone(),
                shell_type: Some(parsed.shell_type),
            },
            is_exact_match: true,
            needs_confirmation: false,
            example_matches: vec![parsed.tokens[0].clone()],
        };
    }
    let prefix = vec![parsed.tokens[0].clone(), parsed.tokens[1].clone()];
    GeneratedPattern {
        entry: GeneratedEntry::Shell {
            command_prefix: prefix.clone(),
            shell_type: Some(parsed.shell_type),
        },
        is_exact_match: false,
        needs_confirmation: true,
        example_matches: vec![prefix.join(" ")],
    }
}

fn unsafe_shell_pattern() -> GeneratedPattern {
    GeneratedPattern {
        entry: GeneratedEntry::ExactOnly,
        is_exact_match: true,
        needs_confirmation: false,
        example_matches: vec![],
    }
}

fn generate_network(call: &ToolCall) -> GeneratedPattern {
    let Some(url) = call.argument_str("url") else {
        return generate_exact_arguments(call);
    };
    let Some((scheme, host)) = split_scheme_host(&url) else {
        return generate_exact_arguments(call);
    };
    // The `(/|$)` suffix is mandatory: it prevents subdomain-spoofing like
    // `api.example.com.evil.com` from matching a pattern meant for
    // `api.example.com`.
    let pattern = format!("^{}://{}(/|$)", escape_regex(&scheme), escape_regex(&host));
    GeneratedPattern {
        entry: GeneratedEntry::Regex {
            tool: call.name.clone(),
            pattern,
        },
        is_exact_match: false,
        needs_confirmation: true,
        example_matches: vec![format!("{scheme}://{host}/"), format!("{scheme}://{host}")],
    }
}

fn split_scheme_host(url: &str) -> Option<(String, String)> {
    let (scheme, rest) = url.split_once("://")?;
    let host = rest.split(['/', '?', '#']).next()?;
    Some((scheme.to_string(), host.to_string()))
}

fn generate_exact_arguments(call: &ToolCall) -> GeneratedPattern {
    GeneratedPattern {
        entry: GeneratedEntry::Regex {
            tool: call.name.clone(),
            pattern: format!("^{}$", escape_regex(&call.arguments_json)),
        },
        is_exact_match: true,
        needs_confirmation: false,
        example_matches: vec![call.arguments_json.clone()],
    }
}

/// Escapes POSIX-ERE metacharacters for use inside an exact-match pattern.
fn escape_regex(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
