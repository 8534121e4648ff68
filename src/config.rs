//! Configuration handling for managed-vpn

use crate::reconcile::{MatchStrategy, RemovalPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const LOCAL_CONFIG_FILE: &str = "managed-vpn.toml";
const DATA_DIR: &str = ".managed-vpn";
const LOCK_FILE: &str = "managed-vpn.lock";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub policy: PolicyConfig,
    pub connection: ConnectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file holding every stored profile
    pub profiles: PathBuf,
    /// JSON file holding the default-profile pointer
    pub preferences: PathBuf,
    /// How long a trigger waits for another one to finish
    pub lock_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Restrictions file written by the device-management agent
    pub path: PathBuf,
    pub poll_interval_secs: u64,
    pub match_strategy: MatchStrategy,
    pub on_policy_removed: RemovalPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Command (argv) that makes sure the connection service is running
    pub command: Vec<String>,
}

fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(DATA_DIR))
        .unwrap_or_else(|| PathBuf::from(DATA_DIR))
}

impl Default for StorageConfig {
    fn default() -> Self {
        let dir = data_dir();
        Self {
            profiles: dir.join("profiles.json"),
            preferences: dir.join("preferences.json"),
            lock_timeout_secs: 10,
        }
    }
}

impl StorageConfig {
    /// Lock file serializing reconciliation, next to the preference store
    pub fn lock_path(&self) -> PathBuf {
        self.preferences.with_file_name(LOCK_FILE)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("restrictions.json"),
            poll_interval_secs: 5,
            match_strategy: MatchStrategy::default(),
            on_policy_removed: RemovalPolicy::default(),
        }
    }
}

impl PolicyConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load config from the working directory, then `~/.managed-vpn/`,
    /// falling back to defaults
    pub fn discover() -> Result<Self, ConfigError> {
        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::load(&local_config);
        }

        let home_config = data_dir().join("config.toml");
        if home_config.exists() {
            return Self::load(&home_config);
        }

        info!("No config file found, using defaults");
        Ok(Config::default())
    }
}
