//! Subagent approval IPC: length-prefixed JSON frames over a pair of pipes
//! (`spec.md` §3 `SubagentChannel`, §4.11).
//!
//! A subagent is a re-exec of the same binary (`ralph subagent-worker`,
//! see `DESIGN.md`) rather than a literal `fork()`: the parent creates two
//! pipes before spawning, passes the child its write-end-of-response and
//! read-end-of-request... in practice the child inherits the *request*
//! pipe's write end and the *response* pipe's read end, and the parent
//! keeps the other two ends. Everything above this module only sees
//! [`SubagentChannel`] (child side) and [`ApprovalMultiplexer`] (parent
//! side); neither knows how its fds came to be open.

use std::io::Read;
use std::io::Write;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;

use crate::error::RalphError;
use crate::types::ApprovalResult;

/// Deadline after which an unanswered request is treated as denied
/// (`spec.md` §4.11).
pub const APPROVAL_TIMEOUT: Duration = Duration::from_millis(300_000);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub tool_name: String,
    pub rendered: String,
    pub arguments_json: String,
    pub from_pid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub id: String,
    pub result: WireApprovalResult,
}

/// Wire twin of [`ApprovalResult`]; kept separate so the channel protocol
/// doesn't change shape if the in-process enum grows variants that make no
/// sense to ship over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireApprovalResult {
    Allowed,
    AllowedAlways,
    Denied,
    RateLimited,
    NonInteractiveDenied,
    Aborted,
}

impl From<ApprovalResult> for WireApprovalResult {
    fn from(r: ApprovalResult) -> Self {
        match r {
            ApprovalResult::Allowed => WireApprovalResult::Allowed,
            ApprovalResult::AllowedAlways => WireApprovalResult::AllowedAlways,
            ApprovalResult::Denied => WireApprovalResult::Denied,
            ApprovalResult::RateLimited => WireApprovalResult::RateLimited,
            ApprovalResult::NonInteractiveDenied => WireApprovalResult::NonInteractiveDenied,
            ApprovalResult::Aborted => WireApprovalResult::Aborted,
        }
    }
}

impl From<WireApprovalResult> for ApprovalResult {
    fn from(r: WireApprovalResult) -> Self {
        match r {
            WireApprovalResult::Allowed => ApprovalResult::Allowed,
            WireApprovalResult::AllowedAlways => ApprovalResult::AllowedAlways,
            WireApprovalResult::Denied => ApprovalResult::Denied,
            WireApprovalResult::RateLimited => ApprovalResult::RateLimited,
            WireApprovalResult::NonInteractiveDenied => ApprovalResult::NonInteractiveDenied,
            WireApprovalResult::Aborted => ApprovalResult::Aborted,
        }
    }
}

fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    w.write_all(&len.to_le_bytes())?;
    w.write_all(payload)?;
    w.flush()
}

fn read_frame<R: Read>(r: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(payload)
}

/// Checks whether `fd` has data ready to read within `timeout`, without
/// consuming it.
#[cfg(unix)]
fn poll_readable(fd: std::os::unix::io::RawFd, timeout: Duration) -> std::io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
    let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(rc > 0 && pollfd.revents & libc::POLLIN != 0)
}

#[cfg(windows)]
fn poll_readable(_fd: i32, _timeout: Duration) -> std::io::Result<bool> {
    // Windows subagents are out of scope for the pipe-fd transport; the
    // worker subcommand falls back to non-interactive denial there.
    Ok(false)
}

/// Child-side handle: a subagent proxies approval requests to its parent
/// through this and blocks (up to [`APPROVAL_TIMEOUT`]) for the answer.
pub struct SubagentChannel {
    request_tx: std::fs::File,
    response_rx: std::fs::File,
}

impl SubagentChannel {
    pub fn new(request_tx: std::fs::File, response_rx: std::fs::File) -> Self {
        Self { request_tx, response_rx }
    }

    pub fn send_request(&mut self, req: &ApprovalRequest) -> Result<(), RalphError> {
        let payload = serde_json::to_vec(req)?;
        write_frame(&mut self.request_tx, &payload)
            .map_err(|e| RalphError::Channel(e.to_string()))
    }

    /// Blocks for a response, returning [`ApprovalResult::Denied`] if the
    /// deadline elapses first (`spec.md` §4.11 timeout-to-denial).
    #[cfg(unix)]
    pub fn recv_response(&mut self, request_id: &str) -> Result<ApprovalResult, RalphError> {
        use std::os::unix::io::AsRawFd;
        let fd = self.response_rx.as_raw_fd();
        let deadline = Instant::now() + APPROVAL_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(ApprovalResult::Denied);
            }
            if !poll_readable(fd, remaining).map_err(|e| RalphError::Channel(e.to_string()))? {
                return Ok(ApprovalResult::Denied);
            }
            let payload =
                read_frame(&mut self.response_rx).map_err(|e| RalphError::Channel(e.to_string()))?;
            let response: ApprovalResponse = serde_json::from_slice(&payload)?;
            if response.id == request_id {
                return Ok(response.result.into());
            }
            // Stale response for a prior (already-timed-out) request: drop
            // and keep waiting for ours within whatever deadline remains.
        }
    }
}

/// One parent-side registration: the request half it reads from and the
/// response half it writes to, for a single live subagent.
pub struct PendingChannel {
    pub subagent_pid: u32,
    pub request_rx: std::fs::File,
    pub response_tx: std::fs::File,
}

/// Parent-side fan-in: polls every registered subagent's request pipe and
/// surfaces the next ready request, so the gate prompter only ever has to
/// deal with one request at a time regardless of how many subagents are
/// live (`spec.md` §4.11).
pub struct ApprovalMultiplexer {
    channels: Vec<PendingChannel>,
}

impl ApprovalMultiplexer {
    pub fn new() -> Self {
        Self { channels: Vec::new() }
    }

    pub fn register(&mut self, channel: PendingChannel) {
        self.channels.push(channel);
    }

    pub fn unregister(&mut self, subagent_pid: u32) {
        self.channels.retain(|c| c.subagent_pid != subagent_pid);
    }

    /// Polls all registered channels once with the given timeout, returning
    /// the index of the first one with a ready request. A channel whose
    /// subagent has already exited reads as an immediate EOF rather than a
    /// frame; that channel is dropped instead of surfaced as an error, so
    /// one finished subagent can't wedge polling for the others still
    /// running.
    #[cfg(unix)]
    pub fn poll_next(&mut self, timeout: Duration) -> Result<Option<(usize, ApprovalRequest)>, RalphError> {
        use std::os::unix::io::AsRawFd;
        let deadline = Instant::now() + timeout;
        let mut dead: Vec<usize> = Vec::new();
        let mut found: Option<(usize, ApprovalRequest)> = None;

        for (idx, channel) in self.channels.iter().enumerate() {
            let fd = channel.request_rx.as_raw_fd();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !poll_readable(fd, remaining).map_err(|e| RalphError::Channel(e.to_string()))? {
                continue;
            }
            let mut rx = &channel.request_rx;
            match read_frame(&mut rx) {
                Ok(payload) => {
                    let request: ApprovalRequest = serde_json::from_slice(&payload)?;
                    found = Some((idx, request));
                    break;
                }
                Err(_) => dead.push(idx),
            }
        }

        for &idx in dead.iter().rev() {
            self.channels.remove(idx);
        }
        Ok(found.map(|(idx, request)| {
            let removed_before = dead.iter().filter(|&&d| d < idx).count();
            (idx - removed_before, request)
        }))
    }

    pub fn respond(&mut self, idx: usize, id: String, result: ApprovalResult) -> Result<(), RalphError> {
        let channel = &mut self.channels[idx];
        let response = ApprovalResponse {
            id,
            result: result.into(),
        };
        let payload = serde_json::to_vec(&response)?;
        write_frame(&mut channel.response_tx, &payload).map_err(|e| RalphError::Channel(e.to_string()))
    }
}

impl Default for ApprovalMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefixes a request id with a hop tag so a grandparent forwarding a
/// grandchild's request can still route the eventual response back down
/// through the intermediate parent (`spec.md` §4.11 nested forwarding).
pub fn tag_request_id(original_id: &str, hop_tag: &str) -> String {
    format!("{hop_tag}:{original_id}")
}

/// Inverse of [`tag_request_id`]: splits off the outermost hop tag, if any.
pub fn untag_request_id(wrapped: &str) -> (Option<&str>, &str) {
    match wrapped.split_once(':') {
        Some((tag, rest)) => (Some(tag), rest),
        None => (None, wrapped),
    }
}
