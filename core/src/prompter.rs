//! Interactive TTY prompter: single and batch modes (`spec.md` §3, §4.9).
//!
//! Output goes to stderr only; stdout stays free for the machine-readable
//! event stream (`spec.md` §6). Construction fails when stdin isn't a TTY so
//! callers fall through to the non-interactive path (`spec.md` §4.10 step 6).

use std::io::IsTerminal;
use std::io::Write;

use crossterm::terminal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleKey {
    Allow,
    Deny,
    AllowAlways,
    Details,
    Aborted,
    Invalid,
}

/// Pure interpretation of one raw input byte in single-prompt mode
/// (`spec.md` §4.9). Factored out from the raw-terminal IO so the mapping
/// itself is unit-testable without a real TTY.
pub fn interpret_single_key(byte: u8) -> SingleKey {
    match byte {
        3 | 4 => SingleKey::Aborted,
        b'y' | b'Y' => SingleKey::Allow,
        b'n' | b'N' => SingleKey::Deny,
        b'a' | b'A' => SingleKey::AllowAlways,
        b'?' => SingleKey::Details,
        _ => SingleKey::Invalid,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKey {
    AllowAll,
    DenyAll,
    Inspect(usize),
    Aborted,
    Invalid,
}

/// Interprets accumulated digits (for `1..N` multi-digit entry via
/// `read_key_timeout`) plus a terminating byte, per `spec.md` §4.9.
pub fn interpret_batch_input(buffer: &str, terminator: Option<u8>) -> BatchKey {
    if let Some(b @ (3 | 4)) = terminator {
        let _ = b;
        return BatchKey::Aborted;
    }
    if buffer.is_empty() {
        return match terminator {
            Some(b'y') | Some(b'Y') => BatchKey::AllowAll,
            Some(b'n') | Some(b'N') => BatchKey::DenyAll,
            _ => BatchKey::Invalid,
        };
    }
    match buffer.parse::<usize>() {
        Ok(n) if n >= 1 => BatchKey::Inspect(n),
        _ => BatchKey::Invalid,
    }
}

pub struct SinglePromptView<'a> {
    pub tool_name: &'a str,
    pub rendered: &'a str,
    /// Set when the request was proxied from a subagent (`spec.md` §4.11).
    pub from_pid: Option<u32>,
}

pub struct DetailsView<'a> {
    pub arguments_json: &'a str,
    pub resolved_path: Option<&'a str>,
    pub path_exists: Option<bool>,
}

pub struct BatchItemView<'a> {
    pub tool_name: &'a str,
    pub rendered: &'a str,
    pub status: BatchItemStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchItemStatus {
    Pending,
    Allowed,
    Denied,
}

impl BatchItemStatus {
    fn glyph(self) -> char {
        match self {
            BatchItemStatus::Pending => ' ',
            BatchItemStatus::Allowed => '+',
            BatchItemStatus::Denied => '-',
        }
    }
}

pub struct GatePrompter;

impl GatePrompter {
    /// Fails (returns `None`) if stdin is not a TTY, per `spec.md` §4.9.
    pub fn new() -> Option<Self> {
        if std::io::stdin().is_terminal() {
            Some(GatePrompter)
        } else {
            None
        }
    }

    pub fn prompt_single(&self, view: &SinglePromptView<'_>) -> SingleKey {
        self.render_single(view);
        loop {
            match self.read_key() {
                Ok(byte) => {
                    let key = interpret_single_key(byte);
                    if key == SingleKey::Invalid {
                        // Invalid keys re-prompt without consuming approval
                        // state.
                        continue;
                    }
                    if key == SingleKey::Details {
                        self.show_details(&DetailsView {
                            arguments_json: view.rendered,
                            resolved_path: None,
                            path_exists: None,
                        });
                        self.render_single(view);
                        continue;
                    }
                    return key;
                }
                Err(_) => return SingleKey::Aborted,
            }
        }
    }

    /// Generic yes/no confirmation, used for the "remember this generalized
    /// pattern?" step (`spec.md` §4.10 step 7). Anything but an explicit
    /// `y`/`Y` counts as no, including a read error.
    pub fn confirm(&self, message: &str) -> bool {
        let mut err = std::io::stderr();
        let _ = writeln!(err, "{message} [y/n]");
        match self.read_key() {
            Ok(byte) => matches!(byte, b'y' | b'Y'),
            Err(_) => false,
        }
    }

    pub fn show_details(&self, view: &DetailsView<'_>) {
        let mut err = std::io::stderr();
        let _ = writeln!(err, "--- details ---");
        let _ = writeln!(err, "arguments: {}", view.arguments_json);
        if let Some(path) = view.resolved_path {
            let _ = writeln!(err, "resolved path: {path}");
        }
        if let Some(exists) = view.path_exists {
            let _ = writeln!(err, "exists: {exists}");
        }
        let _ = writeln!(err, "(press any key to continue)");
        let _ = self.read_key();
    }

    fn render_single(&self, view: &SinglePromptView<'_>) {
        let mut err = std::io::stderr();
        if let Some(pid) = view.from_pid {
            let _ = writeln!(err, "[subagent pid {pid}] {}", view.tool_name);
        } else {
            let _ = writeln!(err, "{}", view.tool_name);
        }
        let _ = writeln!(err, "  {}", view.rendered);
        let _ = writeln!(err, "allow? [y]es [n]o [a]lways [?]details");
    }

    pub fn render_batch(&self, items: &[BatchItemView<'_>]) {
        let mut err = std::io::stderr();
        let _ = writeln!(err, "pending tool calls:");
        for (idx, item) in items.iter().enumerate() {
            let _ = writeln!(
                err,
                "{:>3} [{}] {} {}",
                idx + 1,
                item.status.glyph(),
                item.tool_name,
                item.rendered
            );
        }
        let _ = writeln!(err, "[y]es to all remaining  [n]o to all remaining  or enter a number to inspect");
    }

    /// Reads a single raw byte with the terminal in no-echo raw mode,
    /// restoring the terminal on every exit path (including signals, via
    /// the `Drop` guard below).
    fn read_key(&self) -> std::io::Result<u8> {
        let _guard = RawModeGuard::enable()?;
        let mut buf = [0u8; 1];
        use std::io::Read;
        let n = std::io::stdin().read(&mut buf)?;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "stdin EOF"));
        }
        Ok(buf[0])
    }

    /// Timed variant used for multi-digit `1..N` batch entry
    /// (`spec.md` §4.9). Returns `None` on timeout without consuming input.
    pub fn read_key_timeout(&self, timeout_ms: u64) -> std::io::Result<Option<u8>> {
        let _guard = RawModeGuard::enable()?;
        if crossterm::event::poll(std::time::Duration::from_millis(timeout_ms))? {
            if let crossterm::event::Event::Key(key_event) = crossterm::event::read()? {
                if let crossterm::event::KeyCode::Char(c) = key_event.code {
                    return Ok(Some(c as u8));
                }
                if key_event.code == crossterm::event::KeyCode::Enter {
                    return Ok(Some(b'\n'));
                }
            }
            return Ok(None);
        }
        Ok(None)
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn single_key_mapping() {
        assert_eq!(interpret_single_key(b'y'), SingleKey::Allow);
        assert_eq!(interpret_single_key(b'n'), SingleKey::Deny);
        assert_eq!(interpret_single_key(b'a'), SingleKey::AllowAlways);
        assert_eq!(interpret_single_key(b'?'), SingleKey::Details);
        assert_eq!(interpret_single_key(3), SingleKey::Aborted);
        assert_eq!(interpret_single_key(4), SingleKey::Aborted);
        assert_eq!(interpret_single_key(b'z'), SingleKey::Invalid);
    }

    #[test]
    fn batch_key_all_remaining() {
        assert_eq!(interpret_batch_input("", Some(b'y')), BatchKey::AllowAll);
        assert_eq!(interpret_batch_input("", Some(b'n')), BatchKey::DenyAll);
    }

    #[test]
    fn batch_key_inspect_index() {
        assert_eq!(interpret_batch_input("3", None), BatchKey::Inspect(3));
        assert_eq!(interpret_batch_input("12", None), BatchKey::Inspect(12));
    }

    #[test]
    fn batch_key_abort_on_ctrl_c() {
        assert_eq!(interpret_batch_input("", Some(3)), BatchKey::Aborted);
    }

    #[test]
    fn batch_key_zero_is_invalid() {
        assert_eq!(interpret_batch_input("0", None), BatchKey::Invalid);
    }
}
