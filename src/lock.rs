/*============================================================
  Synavera Project: Hytale-Updater
  Module: hytale_updater::lock
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Guarantee that only one install or update touches a given
    installation root at a time.

  Security / Safety Notes:
    Advisory lock only; cooperating updater processes honour it,
    other tools are not prevented from writing.

  Dependencies:
    fs2 for cross-platform exclusive file locks.

  Operational Scope:
    Held across the mutating phase of install and update runs.

  Revision History:
    2026-10-19 COD  Added installation lock guard.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Fail fast on contention instead of waiting
    - Lock released deterministically on drop
============================================================*/

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{Result, UpdaterError};

/// Held exclusive lock; released when dropped.
#[derive(Debug)]
pub struct InstallLock {
    file: File,
    path: PathBuf,
}

impl InstallLock {
    /// Take the lock at `path` without blocking.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|err| {
                UpdaterError::Filesystem(format!(
                    "Failed to open lock file {}: {err}",
                    path.display()
                ))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                file,
                path: path.to_path_buf(),
            }),
            Err(err) if is_contended(&err) => Err(UpdaterError::Locked {
                path: path.to_path_buf(),
            }),
            Err(err) => Err(UpdaterError::Filesystem(format!(
                "Failed to lock {}: {err}",
                path.display()
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
