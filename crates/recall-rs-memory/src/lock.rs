//! Advisory whole-store lock shared across processes.

use fs2::FileExt;
use log::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Lock file name inside a store location.
pub(crate) const LOCK_FILE: &str = ".recall.lock";

/// Held lock; released on drop.
#[derive(Debug)]
pub(crate) struct StoreLock {
    file: File,
    path: PathBuf,
    exclusive: bool,
}

impl StoreLock {
    /// Block until no writer holds the store.
    pub(crate) fn shared(location: &Path) -> std::io::Result<Self> {
        let (file, path) = open(location)?;
        file.lock_shared()?;
        debug!("acquired shared store lock (path={})", path.display());
        Ok(Self {
            file,
            path,
            exclusive: false,
        })
    }

    /// Block until no other reader or writer holds the store.
    pub(crate) fn exclusive(location: &Path) -> std::io::Result<Self> {
        let (file, path) = open(location)?;
        file.lock_exclusive()?;
        debug!("acquired exclusive store lock (path={})", path.display());
        Ok(Self {
            file,
            path,
            exclusive: true,
        })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(
                "failed to release store lock (path={}, exclusive={}): {err}",
                self.path.display(),
                self.exclusive
            );
        }
    }
}

fn open(location: &Path) -> std::io::Result<(File, PathBuf)> {
    fs::create_dir_all(location)?;
    let path = location.join(LOCK_FILE);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)?;
    Ok((file, path))
}
