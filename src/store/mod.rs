//! Persistent profile and preference storage
//!
//! Both stores are plain JSON files. Lookups return `Ok(None)` for
//! "not configured" and `Err` only when the file itself cannot be used.
//! Writers running in different processes are serialized with
//! [`StoreLock`].

pub mod lock;
pub mod preferences;
pub mod profiles;

pub use lock::StoreLock;
pub use preferences::FilePreferenceStore;
pub use profiles::FileProfileStore;

use crate::profile::{ProfileId, VpnProfile};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to access {path}: {source}")]
    IoError { path: PathBuf, source: io::Error },
    #[error("Corrupt store file {path}: {source}")]
    CorruptError {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Profile rejected by store: {0}")]
    Rejected(String),
    #[error("Timed out after {waited:?} waiting for store lock {path}")]
    LockTimeout { path: PathBuf, waited: Duration },
}

/// Durable keyed storage of profile records
///
/// The store alone assigns identifiers.
pub trait ProfileStore {
    fn get(&self, id: &ProfileId) -> Result<Option<VpnProfile>, StoreError>;
    /// Persist a new record and return the identifier it was given
    fn insert(&mut self, profile: &VpnProfile) -> Result<ProfileId, StoreError>;
    /// Remove a record; removing an unknown id is a no-op
    fn delete(&mut self, id: &ProfileId) -> Result<(), StoreError>;
}

/// Durable holder of the default-profile pointer
pub trait PreferenceStore {
    fn default_profile_id(&self) -> Result<Option<ProfileId>, StoreError>;
    fn set_default_profile_id(&mut self, id: &ProfileId) -> Result<(), StoreError>;
    fn clear_default_profile_id(&mut self) -> Result<(), StoreError>;
}

/// Read a store file, treating a missing file as `None`
fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::IoError {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Replace a store file so readers never see a partial write
///
/// The new content is synced before the rename and the directory entry
/// after it, so the write survives a crash once this returns.
fn write_replace(path: &Path, content: &str) -> Result<(), StoreError> {
    let io_err = |source| StoreError::IoError {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent).map_err(io_err)?;
            parent
        }
        None => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
    tmp.write_all(content.as_bytes()).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    sync_dir(parent).map_err(io_err)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
