//! Named exclusive process lock backed by a lockfile.
//!
//! Exactly one sync engine may run per chain. The lock is held for the
//! process lifetime and released on drop; releasing an already-absent
//! lockfile is silently accepted.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use carver_core::error::CarverError;

/// Exclusive lock on a named resource. Dropping the guard releases it.
pub struct NamedLock {
    path: PathBuf,
    _file: File,
}

impl NamedLock {
    /// Acquire the lock named `name` under `dir`. Fails if another live
    /// process holds it.
    pub fn acquire(dir: &Path, name: &str) -> Result<Self, CarverError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| CarverError::Lock(format!("create lock dir: {e}")))?;
        let path = dir.join(format!("{name}.lock"));

        let mut file = File::create(&path)
            .map_err(|e| CarverError::Lock(format!("create lockfile: {e}")))?;

        file.try_lock().map_err(|e| match e {
            std::fs::TryLockError::WouldBlock => CarverError::Lock(format!(
                "resource '{name}' is already locked by another process"
            )),
            std::fs::TryLockError::Error(io_err) => {
                CarverError::Lock(format!("acquire lock: {io_err}"))
            }
        })?;

        if let Err(e) = writeln!(file, "{}", std::process::id()) {
            tracing::warn!("failed to write PID to lockfile: {e}");
        }

        Ok(Self { path, _file: file })
    }
}

impl Drop for NamedLock {
    fn drop(&mut self) {
        // Unlock is idempotent: a missing file is fine.
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove lockfile: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_creates_file_with_pid() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = NamedLock::acquire(dir.path(), "block").unwrap();

        let content = std::fs::read_to_string(dir.path().join("block.lock")).unwrap();
        let pid: u32 = content.trim().parse().unwrap();
        assert_eq!(pid, std::process::id());
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = NamedLock::acquire(dir.path(), "block").unwrap();
        assert!(NamedLock::acquire(dir.path(), "block").is_err());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = NamedLock::acquire(dir.path(), "block").unwrap();
        }
        assert!(!dir.path().join("block.lock").exists());
        let _again = NamedLock::acquire(dir.path(), "block").unwrap();
    }

    #[test]
    fn distinct_names_do_not_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let _a = NamedLock::acquire(dir.path(), "block").unwrap();
        let _b = NamedLock::acquire(dir.path(), "other").unwrap();
    }
}
