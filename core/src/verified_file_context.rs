//! Verified file context: hands the batch executor's already-opened,
//! TOCTOU-verified file to the tool executor for the duration of one call
//! (`spec.md` §3 `VerifiedFileContext`, §4.12).

use std::cell::RefCell;
use std::fs::File;
use std::path::PathBuf;

use crate::atomic_open;
use crate::atomic_open::ApprovedPath;
use crate::error::VerifyError;
use crate::types::VerifiedFileMode;

struct Slot {
    file: File,
    resolved_path: PathBuf,
}

thread_local! {
    static SLOT: RefCell<Option<Slot>> = const { RefCell::new(None) };
}

/// Verifies and opens `approved` in `mode`, stashing the result for the
/// duration of the current tool call. Must be paired with [`clear`].
pub fn set(approved: &ApprovedPath, mode: VerifiedFileMode) -> Result<(), VerifyError> {
    let file = atomic_open::verify_and_open(approved, mode)?;
    SLOT.with(|slot| {
        *slot.borrow_mut() = Some(Slot {
            file,
            resolved_path: approved.resolved_path.clone(),
        });
    });
    Ok(())
}

/// Clears the context. The batch executor calls this unconditionally after
/// every tool call, success or failure, so a panicking executor can never
/// leak a verified file into the next call.
pub fn clear() {
    SLOT.with(|slot| {
        slot.borrow_mut().take();
    });
}

pub fn resolved_path() -> Option<PathBuf> {
    SLOT.with(|slot| slot.borrow().as_ref().map(|s| s.resolved_path.clone()))
}

/// Runs `f` with the verified file, if one is set. Tool executors fall back
/// to a plain, unverified open when this returns `None` (`spec.md` §4.12) —
/// e.g. when exercised directly in tests outside the batch executor.
pub fn with_file<R>(f: impl FnOnce(&mut File) -> R) -> Option<R> {
    SLOT.with(|slot| slot.borrow_mut().as_mut().map(|s| f(&mut s.file)))
}

pub fn is_set() -> bool {
    SLOT.with(|slot| slot.borrow().is_some())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn set_then_clear_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"hi").unwrap();

        let approved = atomic_open::capture(path.to_str().unwrap()).unwrap();
        set(&approved, VerifiedFileMode::Read).unwrap();
        assert!(is_set());
        assert_eq!(resolved_path().unwrap(), approved.resolved_path);
        clear();
        assert!(!is_set());
    }

    #[test]
    fn with_file_reads_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"hello").unwrap();

        let approved = atomic_open::capture(path.to_str().unwrap()).unwrap();
        set(&approved, VerifiedFileMode::Read).unwrap();
        let contents = with_file(|f| {
            let mut buf = String::new();
            std::io::Read::read_to_string(f, &mut buf).unwrap();
            buf
        });
        clear();
        assert_eq!(contents, Some("hello".to_string()));
    }

    #[test]
    fn no_context_returns_none() {
        clear();
        assert!(with_file(|_| ()).is_none());
    }
}
