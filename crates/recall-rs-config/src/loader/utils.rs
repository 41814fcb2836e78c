//! Helper utilities for descriptor IO and path handling.

use crate::{ConfigError, StoreConfig};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Normalize a path by canonicalizing when possible, preserving NotFound.
pub(crate) fn normalize_path(path: &Path) -> Result<PathBuf, ConfigError> {
    match path.canonicalize() {
        Ok(path) => Ok(path),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(path.to_path_buf()),
        Err(err) => Err(ConfigError::Io(err)),
    }
}

/// Walk ancestors to find a directory containing any marker entries.
pub(crate) fn find_project_root(cwd: &Path, markers: &[&str]) -> Option<PathBuf> {
    for ancestor in cwd.ancestors() {
        if markers.iter().any(|marker| ancestor.join(marker).exists()) {
            return Some(ancestor.to_path_buf());
        }
    }
    None
}

/// Write a descriptor to a uniquely named, fsynced temp file next to the
/// final location.
pub(super) fn write_temp(location: &Path, config: &StoreConfig) -> Result<PathBuf, ConfigError> {
    let serialized = serde_json::to_string_pretty(config)
        .map_err(|err| ConfigError::Invalid(err.to_string()))?;
    let temp = location.join(format!(
        "{}.{}.tmp",
        crate::CONFIG_FILE,
        Uuid::new_v4().simple()
    ));
    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp)?;
    file.write_all(serialized.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    Ok(temp)
}

/// Flush directory metadata so a published rename/link survives a crash.
pub(super) fn sync_dir(location: &Path) {
    #[cfg(unix)]
    if let Ok(dir) = fs::File::open(location) {
        let _ = dir.sync_all();
    }
    #[cfg(not(unix))]
    let _ = location;
}
