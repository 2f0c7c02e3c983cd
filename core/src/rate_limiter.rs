//! Per-tool denial rate limiter with exponential backoff (`spec.md` §3
//! `DenialRecord`, §4.5).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

#[derive(Debug, Clone, Copy, Default)]
struct DenialRecord {
    count: u32,
    backoff_until: Option<Instant>,
}

/// Backoff schedule from `spec.md` §3: 1-2 denials -> 0s, 3 -> 5s, 4 -> 15s,
/// 5 -> 60s, >=6 -> 300s.
fn backoff_for_count(count: u32) -> Duration {
    match count {
        0 | 1 | 2 => Duration::from_secs(0),
        3 => Duration::from_secs(5),
        4 => Duration::from_secs(15),
        5 => Duration::from_secs(60),
        _ => Duration::from_secs(300),
    }
}

pub struct RateLimiter {
    records: Mutex<HashMap<String, DenialRecord>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_blocked(&self, tool: &str) -> bool {
        let records = self.lock();
        match records.get(tool) {
            Some(record) => match record.backoff_until {
                Some(until) => Instant::now() < until,
                None => false,
            },
            None => false,
        }
    }

    pub fn record_denial(&self, tool: &str) {
        let mut records = self.lock();
        let record = records.entry(tool.to_string()).or_default();
        record.count += 1;
        let backoff = backoff_for_count(record.count);
        record.backoff_until = if backoff.is_zero() {
            None
        } else {
            Some(Instant::now() + backoff)
        };
    }

    pub fn reset(&self, tool: &str) {
        let mut records = self.lock();
        records.remove(tool);
    }

    pub fn get_remaining(&self, tool: &str) -> u64 {
        let records = self.lock();
        match records.get(tool).and_then(|r| r.backoff_until) {
            Some(until) => until.saturating_duration_since(Instant::now()).as_secs(),
            None => 0,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DenialRecord>> {
        match self.records.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn first_two_denials_do_not_block() {
        let limiter = RateLimiter::new();
        limiter.record_denial("shell");
        assert!(!limiter.is_blocked("shell"));
        limiter.record_denial("shell");
        assert!(!limiter.is_blocked("shell"));
    }

    #[test]
    fn third_denial_blocks() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            limiter.record_denial("shell");
        }
        assert!(limiter.is_blocked("shell"));
        assert!(limiter.get_remaining("shell") > 0);
    }

    #[test]
    fn reset_clears_backoff() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            limiter.record_denial("shell");
        }
        limiter.reset("shell");
        assert!(!limiter.is_blocked("shell"));
        assert_eq!(limiter.get_remaining("shell"), 0);
    }

    #[test]
    fn backoff_schedule_escalates() {
        assert_eq!(backoff_for_count(1), Duration::from_secs(0));
        assert_eq!(backoff_for_count(3), Duration::from_secs(5));
        assert_eq!(backoff_for_count(4), Duration::from_secs(15));
        assert_eq!(backoff_for_count(5), Duration::from_secs(60));
        assert_eq!(backoff_for_count(9), Duration::from_secs(300));
    }

    #[test]
    fn unknown_tool_is_never_blocked() {
        let limiter = RateLimiter::new();
        assert!(!limiter.is_blocked("never-seen"));
    }
}
