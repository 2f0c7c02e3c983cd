//! Protected-files cache (`spec.md` §3 `ProtectedInodeCache`, §4.4).

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use crate::path_normalize;

const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// A protected-file detector, expressed as configuration rather than
/// hard-coded (`spec.md` §9 open question).
#[derive(Debug, Clone)]
pub enum ProtectedDetector {
    /// Exact basename match, e.g. `ralph.config.json`.
    BasenameExact(String),
    /// Basename prefix match, e.g. `.env.` matches `.env.local`.
    BasenamePrefix(String),
    /// `**`-glob applied to the normalized path.
    Glob(String),
}

impl ProtectedDetector {
    fn matches(&self, normalized_path: &str, basename: &str) -> bool {
        match self {
            ProtectedDetector::BasenameExact(name) => {
                path_normalize::basename_cmp(basename, name)
            }
            ProtectedDetector::BasenamePrefix(prefix) => {
                path_normalize::basename_has_prefix(basename, prefix)
            }
            ProtectedDetector::Glob(pattern) => glob_match(pattern, normalized_path),
        }
    }
}

pub fn default_detectors() -> Vec<ProtectedDetector> {
    vec![
        ProtectedDetector::BasenameExact("ralph.config.json".to_string()),
        ProtectedDetector::BasenameExact(".env".to_string()),
        ProtectedDetector::BasenamePrefix(".env.".to_string()),
        ProtectedDetector::Glob("**/ralph.config.json".to_string()),
        ProtectedDetector::Glob("**/.ralph/config.json".to_string()),
        ProtectedDetector::Glob("**/.env".to_string()),
        ProtectedDetector::Glob("**/.env.*".to_string()),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InodeKey {
    device: u64,
    inode: u64,
}

struct CacheState {
    inodes: HashSet<InodeKey>,
    last_refresh: Option<Instant>,
}

pub struct ProtectedFilesCache {
    detectors: Vec<ProtectedDetector>,
    candidate_roots: Vec<String>,
    state: Mutex<CacheState>,
}

impl ProtectedFilesCache {
    pub fn new(detectors: Vec<ProtectedDetector>, candidate_roots: Vec<String>) -> Self {
        Self {
            detectors,
            candidate_roots,
            state: Mutex::new(CacheState {
                inodes: HashSet::new(),
                last_refresh: None,
            }),
        }
    }

    pub fn with_defaults(candidate_roots: Vec<String>) -> Self {
        Self::new(default_detectors(), candidate_roots)
    }

    /// Passive 30s-TTL refresh: only rescans if the cache is stale.
    pub fn refresh_if_stale(&self) {
        let needs_refresh = {
            let state = match self.state.lock() {
                Ok(s) => s,
                Err(poisoned) => poisoned.into_inner(),
            };
            match state.last_refresh {
                Some(t) => t.elapsed() >= REFRESH_INTERVAL,
                None => true,
            }
        };
        if needs_refresh {
            self.force_refresh();
        }
    }

    /// Unconditional rescan, run at the start of every tool batch
    /// (`spec.md` §4.13) so files created mid-session cannot slip through.
    pub fn force_refresh(&self) {
        let mut inodes = HashSet::new();
        for root in &self.candidate_roots {
            self.scan_candidate(root, &mut inodes);
        }

        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.inodes = inodes;
        state.last_refresh = Some(Instant::now());
    }

    fn scan_candidate(&self, candidate: &str, inodes: &mut HashSet<InodeKey>) {
        let Ok(normalized) = path_normalize::normalize(candidate) else {
            return;
        };
        if !self.textual_match(&normalized.normalized, &normalized.basename) {
            return;
        }
        if let Ok((device, inode)) = stat_device_inode(Path::new(candidate)) {
            inodes.insert(InodeKey { device, inode });
        }
    }

    fn textual_match(&self, normalized_path: &str, basename: &str) -> bool {
        self.detectors
            .iter()
            .any(|d| d.matches(normalized_path, basename))
    }

    /// True if `user_path` is protected, either because it textually matches
    /// a detector or because its current `(device, inode)` was previously
    /// recorded (catches hardlinks/renames).
    pub fn is_protected(&self, user_path: &str) -> bool {
        let Ok(normalized) = path_normalize::normalize(user_path) else {
            return false;
        };
        if self.textual_match(&normalized.normalized, &normalized.basename) {
            return true;
        }

        if let Ok((device, inode)) = stat_device_inode(Path::new(user_path)) {
            let state = match self.state.lock() {
                Ok(s) => s,
                Err(poisoned) => poisoned.into_inner(),
            };
            return state.inodes.contains(&InodeKey { device, inode });
        }

        false
    }
}

#[cfg(unix)]
fn stat_device_inode(path: &Path) -> std::io::Result<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::metadata(path)?;
    Ok((meta.dev(), meta.ino()))
}

#[cfg(windows)]
fn stat_device_inode(path: &Path) -> std::io::Result<(u64, u64)> {
    let meta = std::fs::metadata(path)?;
    let _ = meta;
    Err(std::io::Error::other("volume serial/file index unavailable"))
}

/// Minimal `**` + `*` glob matcher sufficient for the fixed candidate list
/// above; not a general-purpose glob engine.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_parts: Vec<&str> = pattern.split("**/").collect();
    if pattern_parts.len() == 2 && pattern_parts[0].is_empty() {
        let suffix_pattern = pattern_parts[1];
        return text
            .rsplit('/')
            .next()
            .map(|last| star_match(suffix_pattern, last))
            .unwrap_or(false)
            || star_match(suffix_pattern, text);
    }
    star_match(pattern, text)
}

fn star_match(pattern: &str, text: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == text,
        Some((prefix, suffix)) => {
            text.len() >= prefix.len() + suffix.len()
                && text.starts_with(prefix)
                && text.ends_with(suffix)
        }
    }
}
