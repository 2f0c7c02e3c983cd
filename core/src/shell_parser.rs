//! Cross-shell command parser (`spec.md` §3 `ParsedShellCommand`, §4.2).
//!
//! This never attempts to parse a command for execution semantics — see
//! `spec.md` §1 Non-goals. It only tokenizes well enough to answer "is this
//! a single safe-looking command, or something with chains/pipes/subshells/
//! redirects/dangerous substrings that must always be gated".

use crate::error::RalphError;
use crate::types::ShellType;

pub const MAX_COMMAND_LEN: usize = 65536;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedShellCommand {
    pub tokens: Vec<String>,
    pub has_chain: bool,
    pub has_pipe: bool,
    pub has_subshell: bool,
    pub has_redirect: bool,
    pub is_dangerous: bool,
    pub shell_type: ShellType,
}

impl ParsedShellCommand {
    /// `spec.md` §3 invariant: eligible for allowlist matching only when
    /// none of the chain-ish flags and `is_dangerous` are set.
    pub fn eligible_for_allowlist(&self) -> bool {
        !(self.has_chain
            || self.has_pipe
            || self.has_subshell
            || self.has_redirect
            || self.is_dangerous)
    }
}

/// Reads `SHELL`, `COMSPEC`, `PSModulePath` to guess the caller's shell
/// dialect (`spec.md` §4.2).
pub fn detect_shell_type() -> ShellType {
    if std::env::var_os("PSModulePath").is_some() {
        return ShellType::Powershell;
    }
    if let Some(shell) = std::env::var_os("SHELL") {
        let s = shell.to_string_lossy().to_lowercase();
        if s.contains("bash") || s.contains("zsh") || s.contains("sh") {
            return ShellType::Posix;
        }
    }
    if std::env::var_os("COMSPEC").is_some() {
        return ShellType::Cmd;
    }
    ShellType::Unknown
}

pub fn parse(command: &str, shell_type: ShellType) -> Result<ParsedShellCommand, RalphError> {
    if command.len() > MAX_COMMAND_LEN {
        return Err(RalphError::BadArguments(format!(
            "command exceeds max length of {MAX_COMMAND_LEN} bytes"
        )));
    }

    let mut parsed = match shell_type {
        ShellType::Posix | ShellType::Unknown => parse_posix(command),
        ShellType::Cmd => parse_cmd(command),
        ShellType::Powershell => parse_powershell(command),
    };
    parsed.shell_type = shell_type;

    if is_dangerous(command, shell_type) {
        parsed.is_dangerous = true;
    }

    Ok(parsed)
}

#[derive(Default)]
struct ScanFlags {
    chain: bool,
    pipe: bool,
    subshell: bool,
    redirect: bool,
    dangerous: bool,
}

fn parse_posix(command: &str) -> ParsedShellCommand {
    let mut flags = ScanFlags::default();
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut has_current = false;

    #[derive(PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }
    let mut quote = Quote::None;

    if command.contains("$'") {
        // ANSI-C quoting: flagged dangerous *and* forces has_chain per spec.
        flags.dangerous = true;
        flags.chain = true;
    }

    let chars: Vec<char> = command.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                    has_current = true;
                }
                i += 1;
                continue;
            }
            Quote::Double => {
                if c == '"' {
                    quote = Quote::None;
                } else if c == '\\' {
                    // Backslash escape inside double quotes: still a backslash
                    // escape outside single quotes, forces has_chain.
                    flags.chain = true;
                    current.push(c);
                    has_current = true;
                } else {
                    current.push(c);
                    has_current = true;
                }
                i += 1;
                continue;
            }
            Quote::None => {}
        }

        if c.is_whitespace() {
            if has_current {
                tokens.push(std::mem::take(&mut current));
                has_current = false;
            }
            i += 1;
            continue;
        }

        match c {
            '\'' => {
                quote = Quote::Single;
                has_current = true;
                i += 1;
            }
            '"' => {
                quote = Quote::Double;
                has_current = true;
                i += 1;
            }
            '\\' => {
                // Unquoted backslash escape forces has_chain (defensive).
                flags.chain = true;
                current.push(c);
                has_current = true;
                i += 1;
            }
            '`' => {
                flags.subshell = true;
                current.push(c);
                has_current = true;
                i += 1;
            }
            '$' if chars.get(i + 1) == Some(&'(') => {
                flags.subshell = true;
                current.push(c);
                has_current = true;
                i += 1;
            }
            '(' | ')' => {
                flags.subshell = true;
                i += 1;
            }
            ';' => {
                flags.chain = true;
                i += 1;
            }
            '>' | '<' => {
                flags.redirect = true;
                i += 1;
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    flags.chain = true;
                    i += 2;
                } else {
                    flags.chain = true;
                    i += 1;
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    flags.chain = true;
                    i += 2;
                } else {
                    flags.pipe = true;
                    i += 1;
                }
            }
            _ => {
                if (c as u32) >= 0x80 {
                    flags.chain = true;
                }
                current.push(c);
                has_current = true;
                i += 1;
            }
        }
    }

    if quote != Quote::None {
        // Unbalanced quotes force has_chain (defensive).
        flags.chain = true;
    }
    if has_current {
        tokens.push(current);
    }

    ParsedShellCommand {
        tokens,
        has_chain: flags.chain,
        has_pipe: flags.pipe,
        has_subshell: flags.subshell,
        has_redirect: flags.redirect,
        is_dangerous: flags.dangerous,
        shell_type: ShellType::Posix,
    }
}

fn parse_cmd(command: &str) -> ParsedShellCommand {
    let mut flags = ScanFlags::default();
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut has_current = false;
    let mut in_quote = false;

    let chars: Vec<char> = command.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if in_quote {
            if c == '"' {
                in_quote = false;
            } else {
                current.push(c);
                has_current = true;
            }
            i += 1;
            continue;
        }

        if c.is_whitespace() {
            if has_current {
                tokens.push(std::mem::take(&mut current));
                has_current = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_quote = true;
                has_current = true;
            }
            '&' => flags.chain = true,
            '|' => flags.pipe = true,
            '<' | '>' => flags.redirect = true,
            '^' => flags.chain = true,
            '%' => flags.chain = true,
            _ => {
                current.push(c);
                has_current = true;
            }
        }
        i += 1;
    }

    if in_quote {
        flags.chain = true;
    }
    if has_current {
        tokens.push(current);
    }

    ParsedShellCommand {
        tokens,
        has_chain: flags.chain,
        has_pipe: flags.pipe,
        has_subshell: flags.subshell,
        has_redirect: flags.redirect,
        is_dangerous: flags.dangerous,
        shell_type: ShellType::Cmd,
    }
}

fn parse_powershell(command: &str) -> ParsedShellCommand {
    let mut flags = ScanFlags::default();
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut has_current = false;

    #[derive(PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }
    let mut quote = Quote::None;

    let chars: Vec<char> = command.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                    has_current = true;
                }
                i += 1;
                continue;
            }
            Quote::Double => {
                if c == '"' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                    has_current = true;
                }
                i += 1;
                continue;
            }
            Quote::None => {}
        }

        if c.is_whitespace() {
            if has_current {
                tokens.push(std::mem::take(&mut current));
                has_current = false;
            }
            i += 1;
            continue;
        }

        match c {
            '\'' => {
                quote = Quote::Single;
                has_current = true;
            }
            '"' => {
                quote = Quote::Double;
                has_current = true;
            }
            ';' => flags.chain = true,
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    i += 1;
                }
                flags.chain = true;
            }
            '|' => flags.pipe = true,
            '{' | '}' => flags.subshell = true,
            '>' | '<' => flags.redirect = true,
            '$' if chars.get(i + 1) == Some(&'(') => {
                flags.subshell = true;
                current.push(c);
                has_current = true;
            }
            '@' if chars.get(i + 1) == Some(&'(') => {
                flags.subshell = true;
                current.push(c);
                has_current = true;
            }
            _ => {
                current.push(c);
                has_current = true;
            }
        }
        i += 1;
    }

    if quote != Quote::None {
        flags.chain = true;
    }
    if has_current {
        tokens.push(current);
    }

    ParsedShellCommand {
        tokens,
        has_chain: flags.chain,
        has_pipe: flags.pipe,
        has_subshell: flags.subshell,
        has_redirect: flags.redirect,
        is_dangerous: flags.dangerous,
        shell_type: ShellType::Powershell,
    }
}

const DANGEROUS_SUBSTRINGS: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "rm -r -f",
    "rm -f -r",
    "chmod 777",
    "chmod -r",
    ":(){ :|:& };:",
];

const REMOTE_DOWNLOAD_TOOLS: &[&str] = &["curl", "wget"];
const SHELL_PIPE_TARGETS: &[&str] = &["sh", "bash", "zsh"];

const POWERSHELL_DANGEROUS_SUBSTRINGS: &[&str] = &[
    "invoke-expression",
    "invoke-command",
    "start-process",
    "invoke-webrequest",
    "invoke-restmethod",
    "iex",
    "icm",
    "iwr",
    "irm",
    "-encodedcommand",
    "-enc",
    "downloadstring",
    "downloadfile",
];

fn is_dangerous(command: &str, shell_type: ShellType) -> bool {
    let lower = command.to_lowercase();

    for pat in DANGEROUS_SUBSTRINGS {
        if lower.contains(pat) {
            return true;
        }
    }

    if REMOTE_DOWNLOAD_TOOLS.iter().any(|t| lower.contains(t))
        && lower.contains('|')
        && SHELL_PIPE_TARGETS
            .iter()
            .any(|t| lower.contains(&format!("|{t}")) || lower.contains(&format!("| {t}")))
    {
        return true;
    }

    if is_raw_disk_write(&lower) {
        return true;
    }

    if shell_type == ShellType::Powershell
        && POWERSHELL_DANGEROUS_SUBSTRINGS.iter().any(|p| lower.contains(p))
    {
        return true;
    }

    false
}

fn is_raw_disk_write(lower: &str) -> bool {
    const DEVICE_PREFIXES: &[&str] = &["/dev/sd", "/dev/hd", "/dev/nvme"];
    if lower.contains("of=") {
        for prefix in DEVICE_PREFIXES {
            if lower
                .split("of=")
                .skip(1)
                .any(|tail| tail.starts_with(&prefix[1..]) || tail.starts_with(prefix))
            {
                return true;
            }
        }
    }
    for prefix in DEVICE_PREFIXES {
        if lower.contains(&format!("> {prefix}")) || lower.contains(&format!(">{prefix}")) {
            return true;
        }
    }
    false
}

/// `spec.md` §4.2: true iff `parsed` is eligible for matching and its leading
/// tokens equal `prefix` exactly.
pub fn matches_prefix(parsed: &ParsedShellCommand, prefix: &[String]) -> bool {
    if !parsed.eligible_for_allowlist() {
        return false;
    }
    if parsed.tokens.len() < prefix.len() {
        return false;
    }
    parsed.tokens[..prefix.len()] == *prefix
}

/// Rows of the command-equivalence table (`spec.md` §4.2). Deliberately
/// narrow: `cd` is not equivalent to `pwd`.
const EQUIVALENCE_TABLE: &[&[&str]] = &[
    &["ls", "dir", "get-childitem", "gci"],
    &["cat", "type", "get-content", "gc"],
    &["pwd", "get-location", "gl"],
    &["rm", "del", "erase", "remove-item", "ri"],
    &["cp", "copy", "copy-item", "cpi"],
    &["mv", "move", "ren", "move-item", "mi"],
    &["echo", "write-output", "write-host"],
    &["clear", "cls", "clear-host"],
];

pub fn commands_are_equivalent(a: &str, b: &str) -> bool {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    EQUIVALENCE_TABLE
        .iter()
        .any(|row| row.contains(&a_lower.as_str()) && row.contains(&b_lower.as_str()))
}
