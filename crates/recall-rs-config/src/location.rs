//! Resolution of the directory a store lives in.

use crate::ConfigError;
use crate::loader::find_project_root;
use directories::BaseDirs;
use log::debug;
use std::path::{Path, PathBuf};

/// Store directory relative to a project root or the home directory.
const STORE_SUBDIR: &[&str] = &[".claude", "memory"];
/// Marker files/dirs that identify a project root.
const PROJECT_ROOT_MARKERS: &[&str] = &[".git"];

/// Where a resolved location came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationSource {
    /// Explicit caller override.
    Explicit,
    /// Nearest enclosing version-controlled project.
    Project,
    /// User home directory.
    Home,
}

/// A store directory plus the rule that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLocation {
    /// Absolute store directory.
    pub path: PathBuf,
    /// Rule that selected it.
    pub source: LocationSource,
}

impl StoreLocation {
    /// Resolve a store directory.
    ///
    /// Precedence: explicit override, then `<project root>/.claude/memory`,
    /// then `<home>/.claude/memory`.
    pub fn resolve(explicit: Option<&Path>, cwd: &Path) -> Result<Self, ConfigError> {
        let home = BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
        Self::resolve_with_home(explicit, cwd, home.as_deref())
    }

    /// Same as [`StoreLocation::resolve`] with an explicit home directory.
    pub fn resolve_with_home(
        explicit: Option<&Path>,
        cwd: &Path,
        home: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                cwd.join(path)
            };
            debug!("using explicit store location: {}", path.display());
            return Ok(Self {
                path: crate::loader::normalize_path(&path)?,
                source: LocationSource::Explicit,
            });
        }

        let cwd = crate::loader::normalize_path(cwd)?;
        if let Some(root) = find_project_root(&cwd, PROJECT_ROOT_MARKERS) {
            debug!("resolved project root for store: {}", root.display());
            return Ok(Self {
                path: with_subdir(&root),
                source: LocationSource::Project,
            });
        }

        let home = home.ok_or_else(|| {
            ConfigError::Invalid("cannot determine home directory for store".to_string())
        })?;
        Ok(Self {
            path: with_subdir(home),
            source: LocationSource::Home,
        })
    }
}

fn with_subdir(base: &Path) -> PathBuf {
    STORE_SUBDIR
        .iter()
        .fold(base.to_path_buf(), |path, part| path.join(part))
}
