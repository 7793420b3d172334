//! Per-target build lock.
//!
//! Two builds racing for the same image file or block device would
//! corrupt each other through the shared loop-device and mount tables,
//! so each build holds an exclusive flock on a lock file keyed by the
//! target path for its whole lifetime. Builds against different targets
//! stay independent.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Held for the duration of a build; dropping releases the lock.
pub struct BuildLock {
    _file: File,
    path: PathBuf,
}

/// Lock file location for a given target path.
///
/// Keyed by a digest of the path rather than the path itself so that
/// any target (including nested or oddly-named ones) maps to a flat
/// name under the system temp directory.
pub fn lock_path_for(target: &Path) -> PathBuf {
    let digest = Sha256::digest(target.as_os_str().as_bytes());
    let key = format!("{:x}", digest);
    std::env::temp_dir().join(format!("archimage-{}.lock", &key[..16]))
}

impl BuildLock {
    /// Acquire the lock for `target`, failing if another build holds it.
    pub fn acquire(target: &Path) -> Result<Self> {
        let path = lock_path_for(target);

        // Never unlink a lock file that may still be held: a second
        // process could recreate it and take a separate, useless lock.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("creating lock file '{}'", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            bail!(
                "another build is already running against '{}' (lock: {})",
                target.display(),
                path.display()
            );
        }

        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
