//! Reset serialization: an in-process flag plus an on-disk marker so
//! overlapping reset requests (signal spam, multiple CLI invocations)
//! collapse into one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

/// Marker file present while a reset is running.
pub const MARKER: &str = "orez.resetting";

pub struct ResetLock {
    in_progress: AtomicBool,
    marker: PathBuf,
}

impl ResetLock {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            in_progress: AtomicBool::new(false),
            marker: data_dir.join(MARKER),
        }
    }

    /// Take the lock, or None if a reset is already running.
    pub fn acquire(&self) -> Option<ResetGuard<'_>> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return None;
        }

        if let Err(err) = std::fs::write(&self.marker, std::process::id().to_string()) {
            debug!("reset marker: {}", err);
        }

        Some(ResetGuard { lock: self })
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }
}

pub struct ResetGuard<'a> {
    lock: &'a ResetLock,
}

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.lock.marker) {
            debug!("reset marker removal: {}", err);
        }
        self.lock.in_progress.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn second_acquire_fails_until_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ResetLock::new(dir.path());

        let guard = lock.acquire().expect("first acquire");
        assert!(lock.in_progress());
        assert!(dir.path().join(MARKER).exists());
        assert!(lock.acquire().is_none());

        drop(guard);
        assert!(!lock.in_progress());
        assert!(!dir.path().join(MARKER).exists());

        let _guard = lock.acquire().expect("acquire after release");
    }
}
