//! JSON-file preference store holding the default-profile pointer

use super::{read_optional, write_replace, PreferenceStore, StoreError};
use crate::profile::ProfileId;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const PREF_DEFAULT_VPN_PROFILE: &str = "default_vpn_profile";

/// Scalar key-value preferences; only the default-profile key is used here
/// but other keys written by other tools are preserved.
pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match read_optional(&self.path)? {
            Some(content) => {
                serde_json::from_str(&content).map_err(|source| StoreError::CorruptError {
                    path: self.path.clone(),
                    source,
                })
            }
            None => Ok(BTreeMap::new()),
        }
    }

    fn save(&self, prefs: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let content =
            serde_json::to_string_pretty(prefs).map_err(|source| StoreError::CorruptError {
                path: self.path.clone(),
                source,
            })?;
        write_replace(&self.path, &content)
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn default_profile_id(&self) -> Result<Option<ProfileId>, StoreError> {
        Ok(self
            .load()?
            .remove(PREF_DEFAULT_VPN_PROFILE)
            .filter(|id| !id.is_empty())
            .map(ProfileId::new))
    }

    fn set_default_profile_id(&mut self, id: &ProfileId) -> Result<(), StoreError> {
        let mut prefs = self.load()?;
        prefs.insert(PREF_DEFAULT_VPN_PROFILE.to_string(), id.to_string());
        self.save(&prefs)
    }

    fn clear_default_profile_id(&mut self) -> Result<(), StoreError> {
        let mut prefs = self.load()?;
        if prefs.remove(PREF_DEFAULT_VPN_PROFILE).is_some() {
            self.save(&prefs)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_store(temp_dir: &TempDir, content: Option<&str>) -> FilePreferenceStore {
        let path = temp_dir.path().join("preferences.json");
        if let Some(content) = content {
            fs::write(&path, content).unwrap();
        }
        FilePreferenceStore::with_path(path)
    }

    #[test]
    fn test_missing_file_has_no_default() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir, None);

        assert!(store.default_profile_id().unwrap().is_none());
    }

    #[test]
    fn test_set_and_get_default() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = create_test_store(&temp_dir, None);

        store.set_default_profile_id(&ProfileId::new("abc")).unwrap();
        assert_eq!(
            store.default_profile_id().unwrap(),
            Some(ProfileId::new("abc"))
        );

        let reopened = create_test_store(&temp_dir, None);
        assert_eq!(
            reopened.default_profile_id().unwrap(),
            Some(ProfileId::new("abc"))
        );
    }

    #[test]
    fn test_other_keys_preserved() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = create_test_store(&temp_dir, Some(r#"{"theme": "dark"}"#));

        store.set_default_profile_id(&ProfileId::new("abc")).unwrap();
        store.clear_default_profile_id().unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("theme"));
        assert!(!content.contains(PREF_DEFAULT_VPN_PROFILE));
    }

    #[test]
    fn test_empty_value_is_absent() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir, Some(r#"{"default_vpn_profile": ""}"#));

        assert!(store.default_profile_id().unwrap().is_none());
    }

    #[test]
    fn test_clear_without_file_does_not_create_it() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = create_test_store(&temp_dir, None);

        store.clear_default_profile_id().unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir, Some("[1, 2"));

        let result = store.default_profile_id();
        assert!(matches!(result, Err(StoreError::CorruptError { .. })));
    }
}
