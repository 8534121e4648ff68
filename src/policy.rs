//! Managed policy (device-management restrictions) parsing
//!
//! The device-management agent drops the administrator's restrictions
//! for this app as a flat JSON object. Only string values count; the
//! keys below are the ones that shape the default VPN profile.
//!
//! # Recognized Keys
//!
//! | Key | Example | Profile field |
//! |-----|---------|---------------|
//! | `vpn_name` | `Corp` | `name` |
//! | `vpn_server` | `vpn.example.com` | `gateway` |
//! | `vpn_login` | `alice` | `username` |
//! | `vpn_password` | `s3cret` | `password` |

use crate::profile::{VpnProfile, VpnType};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const KEY_NAME: &str = "vpn_name";
pub const KEY_SERVER: &str = "vpn_server";
pub const KEY_LOGIN: &str = "vpn_login";
pub const KEY_PASSWORD: &str = "vpn_password";

/// Protocol used for every profile derived from managed policy
pub const POLICY_VPN_TYPE: VpnType = VpnType::Ikev2Eap;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Failed to read policy file {path}: {source}")]
    ReadError { path: PathBuf, source: io::Error },
    #[error("Failed to parse policy file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Policy file {0} does not contain a JSON object")]
    NotAnObject(PathBuf),
}

/// Immutable view of the managed restrictions at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicySnapshot {
    values: BTreeMap<String, String>,
}

impl PolicySnapshot {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Build the profile this policy asks for
    ///
    /// Missing keys leave the matching field empty. Nothing is defaulted
    /// or validated.
    pub fn to_profile(&self) -> VpnProfile {
        let get = |key: &str| self.get(key).map(str::to_string);
        VpnProfile {
            id: None,
            name: get(KEY_NAME),
            gateway: get(KEY_SERVER),
            username: get(KEY_LOGIN),
            password: get(KEY_PASSWORD),
            vpn_type: POLICY_VPN_TYPE,
        }
    }

    /// Parse a restrictions document, keeping only string values
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        let object = json.as_object()?;
        let values = object
            .iter()
            .filter_map(|(key, value)| match value.as_str() {
                Some(s) => Some((key.clone(), s.to_string())),
                None => {
                    debug!("Ignoring non-string restriction {}", key);
                    None
                }
            })
            .collect();
        Some(Self { values })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PolicySnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Read-only source of managed restrictions
pub trait PolicySource {
    /// Current restrictions, or `None` when no managed policy is installed
    fn snapshot(&self) -> Result<Option<PolicySnapshot>, PolicyError>;
}

/// Policy source backed by the restrictions file the management agent writes
pub struct FilePolicySource {
    path: PathBuf,
}

impl FilePolicySource {
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicySource for FilePolicySource {
    fn snapshot(&self) -> Result<Option<PolicySnapshot>, PolicyError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No managed policy at {}", self.path.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(PolicyError::ReadError {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let json: serde_json::Value =
            serde_json::from_str(&content).map_err(|source| PolicyError::ParseError {
                path: self.path.clone(),
                source,
            })?;

        PolicySnapshot::from_json(&json)
            .map(Some)
            .ok_or_else(|| PolicyError::NotAnObject(self.path.clone()))
    }
}
