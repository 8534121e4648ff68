//! JSON-file profile store

use super::{read_optional, write_replace, ProfileStore, StoreError};
use crate::profile::{ProfileId, VpnProfile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfilesFile {
    #[serde(default)]
    profiles: Vec<VpnProfile>,
}

pub struct FileProfileStore {
    path: PathBuf,
}

impl FileProfileStore {
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored profiles, in insertion order
    pub fn list(&self) -> Result<Vec<VpnProfile>, StoreError> {
        Ok(self.load()?.profiles)
    }

    fn load(&self) -> Result<ProfilesFile, StoreError> {
        match read_optional(&self.path)? {
            Some(content) => {
                serde_json::from_str(&content).map_err(|source| StoreError::CorruptError {
                    path: self.path.clone(),
                    source,
                })
            }
            None => Ok(ProfilesFile::default()),
        }
    }

    fn save(&self, file: &ProfilesFile) -> Result<(), StoreError> {
        let content =
            serde_json::to_string_pretty(file).map_err(|source| StoreError::CorruptError {
                path: self.path.clone(),
                source,
            })?;
        write_replace(&self.path, &content)
    }
}

impl ProfileStore for FileProfileStore {
    fn get(&self, id: &ProfileId) -> Result<Option<VpnProfile>, StoreError> {
        Ok(self
            .load()?
            .profiles
            .into_iter()
            .find(|p| p.id.as_ref() == Some(id)))
    }

    fn insert(&mut self, profile: &VpnProfile) -> Result<ProfileId, StoreError> {
        let mut file = self.load()?;

        let id = ProfileId::new(Uuid::new_v4().to_string());
        if file.profiles.iter().any(|p| p.id.as_ref() == Some(&id)) {
            return Err(StoreError::Rejected(format!("identifier {} already in use", id)));
        }

        file.profiles.push(profile.with_id(id.clone()));
        self.save(&file)?;
        debug!("Stored profile {} as {}", profile.display_name(), id);
        Ok(id)
    }

    fn delete(&mut self, id: &ProfileId) -> Result<(), StoreError> {
        let mut file = self.load()?;
        let before = file.profiles.len();
        file.profiles.retain(|p| p.id.as_ref() != Some(id));

        if file.profiles.len() == before {
            debug!("Profile {} not stored, nothing to delete", id);
            return Ok(());
        }

        self.save(&file)?;
        debug!("Deleted profile {}", id);
        Ok(())
    }
}
