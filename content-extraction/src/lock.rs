//! Named advisory lock shared between processes.
//!
//! A lock is a file `<lock_dir>/<name>.lock` held with an exclusive
//! `flock`. The guard releases it on drop, including on error paths.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Held exclusive lock; released when dropped
#[derive(Debug)]
pub struct NamedLock {
    file: File,
    path: PathBuf,
}

impl NamedLock {
    /// Block until the named lock is acquired
    pub fn acquire(lock_dir: &Path, name: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(lock_dir)?;
        let path = lock_dir.join(format!("{}.lock", name));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        file.lock_exclusive()?;
        debug!("Acquired lock {:?}", path);

        Ok(Self { file, path })
    }

    /// Try to take the lock without waiting. Returns `Ok(None)` if another
    /// holder has it.
    pub fn try_acquire(lock_dir: &Path, name: &str) -> std::io::Result<Option<Self>> {
        std::fs::create_dir_all(lock_dir)?;
        let path = lock_dir.join(format!("{}.lock", name));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NamedLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release lock {:?}: {}", self.path, e);
        } else {
            debug!("Released lock {:?}", self.path);
        }
    }
}
