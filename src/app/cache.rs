use crate::app::exec_credential::ExecCredential;
use crate::app::files::{create_private_dir, write_private_file};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Outcome of reading a cached credential.
#[derive(Debug, PartialEq)]
pub enum CacheLookup {
    Fresh(ExecCredential),
    Missing,
    /// Expiration unset or reached. The file has been removed.
    Expired,
    /// The file could not be parsed. The file has been removed.
    Corrupt,
}

impl CacheLookup {
    pub fn into_credential(self) -> Option<ExecCredential> {
        match self {
            CacheLookup::Fresh(credential) => Some(credential),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to read cached credential {path}: {source}")]
    FailedToRead { path: PathBuf, source: io::Error },

    #[error("Failed to remove stale cached credential {path}: {source}")]
    FailedToRemove { path: PathBuf, source: io::Error },

    #[error("Failed to create credential cache directory {path}: {source}")]
    FailedToCreateDir { path: PathBuf, source: io::Error },

    #[error("Failed to write cached credential {path}: {source}")]
    FailedToWrite { path: PathBuf, source: io::Error },

    #[error("Failed to serialize credential for the cache: {source}")]
    FailedToSerialize { source: serde_json::Error },

    #[error("Invalid cluster id {cluster_id:?}: must be a single path component")]
    InvalidClusterId { cluster_id: String },
}

/// Per-cluster exec credential files under `<config dir>/cache/exec-credential`.
#[derive(Debug, Clone)]
pub struct CredentialCache {
    dir: PathBuf,
}

impl CredentialCache {
    /// Cache living next to the tool's config file.
    pub fn for_config_file(config_path: &Path) -> Self {
        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        Self::new(base.join("cache").join("exec-credential"))
    }

    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file of `cluster_id`. Ids that would leave the cache directory are rejected.
    pub fn path_for(&self, cluster_id: &str) -> Result<PathBuf, CacheError> {
        let escapes = cluster_id.is_empty()
            || cluster_id == "."
            || cluster_id == ".."
            || cluster_id.contains(|c| matches!(c, '/' | '\\' | '\0'));
        if escapes {
            return Err(CacheError::InvalidClusterId {
                cluster_id: cluster_id.to_string(),
            });
        }
        Ok(self.dir.join(format!("{cluster_id}.json")))
    }

    pub fn load(&self, cluster_id: &str) -> Result<CacheLookup, CacheError> {
        self.load_at(cluster_id, Utc::now())
    }

    /// Reads the cached credential as seen at `now`, removing it when it is stale or unreadable.
    pub fn load_at(&self, cluster_id: &str, now: DateTime<Utc>) -> Result<CacheLookup, CacheError> {
        let path = self.path_for(cluster_id)?;
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::debug!("No cached credential for cluster {cluster_id}");
                return Ok(CacheLookup::Missing);
            }
            Err(source) => return Err(CacheError::FailedToRead { path, source }),
        };

        let credential: ExecCredential = match serde_json::from_slice(&contents) {
            Ok(credential) => credential,
            Err(err) => {
                log::warn!("Discarding unreadable cached credential {}: {err}", path.display());
                remove(&path)?;
                return Ok(CacheLookup::Corrupt);
            }
        };

        match credential.expiration() {
            Some(expires_at) if expires_at > now => {
                log::debug!("Using cached credential for cluster {cluster_id}, valid until {expires_at}");
                Ok(CacheLookup::Fresh(credential))
            }
            _ => {
                log::debug!("Cached credential for cluster {cluster_id} has expired");
                remove(&path)?;
                Ok(CacheLookup::Expired)
            }
        }
    }

    /// Persists the credential. Credentials without an expiration are never cached.
    pub fn store(&self, cluster_id: &str, credential: &ExecCredential) -> Result<(), CacheError> {
        let path = self.path_for(cluster_id)?;
        if credential.expiration().is_none() {
            return Ok(());
        }

        create_private_dir(&self.dir).map_err(|source| CacheError::FailedToCreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let mut body = serde_json::to_vec(credential)
            .map_err(|source| CacheError::FailedToSerialize { source })?;
        body.push(b'\n');

        write_private_file(&path, &body).map_err(|source| CacheError::FailedToWrite {
            path: path.clone(),
            source,
        })?;
        log::debug!("Cached credential for cluster {cluster_id} at {}", path.display());
        Ok(())
    }
}

fn remove(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CacheError::FailedToRemove {
            path: path.to_path_buf(),
            source,
        }),
    }
}
