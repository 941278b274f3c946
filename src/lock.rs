//! One active run per workspace
//!
//! A second trigger while a run holds the lock is rejected rather than
//! queued. The lock is advisory and released when the guard drops, including
//! when the holding process dies.

use crate::error::{FilesystemError, RunError};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

const LOCK_DIR: &str = ".cover-runner";
const LOCK_FILE: &str = "run.lock";

#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(workspace_root: &Path) -> Result<Self, RunError> {
        let dir = workspace_root.join(LOCK_DIR);
        let path = dir.join(LOCK_FILE);
        let file = fs::create_dir_all(&dir)
            .and_then(|_| File::create(&path))
            .map_err(|source| FilesystemError::Lock {
                path: path.clone(),
                source,
            })?;

        if file.try_lock_exclusive().is_err() {
            return Err(RunError::Busy(workspace_root.to_path_buf()));
        }
        tracing::debug!(path = %path.display(), "run lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
