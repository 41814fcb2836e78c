//! Loading, first-use creation and forced replacement of store descriptors.
//!
//! Creation writes a complete temp file and publishes it with a hard link,
//! which fails if another process published first; the loser discards its
//! candidate and adopts the winner. Replacement goes through an atomic
//! rename and is only safe while the caller holds the store's exclusive lock.

mod utils;


use crate::{ConfigError, EmbeddingProfile, StoreConfig};
use log::{debug, info, warn};
use recall_rs_index::IndexParams;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub(crate) use utils::{find_project_root, normalize_path};

/// A descriptor plus whether this call created it.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedConfig {
    /// The effective descriptor.
    pub config: StoreConfig,
    /// True when this call published the descriptor.
    pub created: bool,
}

impl StoreConfig {
    /// Load the descriptor at `location`, or `None` if the store has never
    /// been initialised.
    pub fn load(location: &Path) -> Result<Option<Self>, ConfigError> {
        let path = Self::path_in(location);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("store config missing (path={})", path.display());
                return Ok(None);
            }
            Err(err) => return Err(ConfigError::Io(err)),
        };
        let config: StoreConfig =
            serde_json::from_str(&contents).map_err(|err| ConfigError::Corrupt {
                path: path.clone(),
                message: err.to_string(),
            })?;
        if let Some(message) = config.problems() {
            return Err(ConfigError::Corrupt { path, message });
        }
        Ok(Some(config))
    }

    /// Load the descriptor at `location`, creating it from `profile` if absent.
    ///
    /// Concurrent first-use callers converge on a single descriptor.
    pub fn load_or_init(
        location: &Path,
        profile: &EmbeddingProfile,
        index: IndexParams,
    ) -> Result<LoadedConfig, ConfigError> {
        if let Some(config) = Self::load(location)? {
            return Ok(LoadedConfig {
                config,
                created: false,
            });
        }
        let candidate = Self::new(location, profile, index);
        if let Some(message) = candidate.problems() {
            return Err(ConfigError::Invalid(message));
        }
        fs::create_dir_all(location)?;
        let path = Self::path_in(location);
        let temp = utils::write_temp(location, &candidate)?;
        let published = fs::hard_link(&temp, &path);
        if let Err(err) = fs::remove_file(&temp) {
            warn!(
                "failed to remove temp config (path={}): {err}",
                temp.display()
            );
        }
        match published {
            Ok(()) => {
                utils::sync_dir(location);
                info!(
                    "created store config (path={}, provider={}, model={}, dimension={})",
                    path.display(),
                    candidate.provider,
                    candidate.model,
                    candidate.dimension
                );
                Ok(LoadedConfig {
                    config: candidate,
                    created: true,
                })
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!(
                    "store config published concurrently; adopting it (path={})",
                    path.display()
                );
                let config = Self::load(location)?.ok_or_else(|| ConfigError::Corrupt {
                    path: path.clone(),
                    message: "config vanished after concurrent creation".to_string(),
                })?;
                Ok(LoadedConfig {
                    config,
                    created: false,
                })
            }
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    /// Atomically replace the descriptor at `location`.
    pub fn replace(location: &Path, config: &StoreConfig) -> Result<(), ConfigError> {
        if let Some(message) = config.problems() {
            return Err(ConfigError::Invalid(message));
        }
        fs::create_dir_all(location)?;
        let temp = utils::write_temp(location, config)?;
        let path = Self::path_in(location);
        fs::rename(&temp, &path)?;
        utils::sync_dir(location);
        info!(
            "replaced store config (path={}, store_id={})",
            path.display(),
            config.store_id
        );
        Ok(())
    }
}
