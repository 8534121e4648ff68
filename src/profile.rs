//! VPN profile records

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a stored profile, assigned by the profile store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(String);

impl ProfileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection protocol variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VpnType {
    /// IKEv2 with EAP username/password authentication
    #[default]
    Ikev2Eap,
    Ikev2Cert,
    Ikev2CertEap,
    Ikev2EapTls,
    Ikev2Byod,
}

impl fmt::Display for VpnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VpnType::Ikev2Eap => "ikev2-eap",
            VpnType::Ikev2Cert => "ikev2-cert",
            VpnType::Ikev2CertEap => "ikev2-cert-eap",
            VpnType::Ikev2EapTls => "ikev2-eap-tls",
            VpnType::Ikev2Byod => "ikev2-byod",
        };
        f.write_str(s)
    }
}

/// One VPN connection configuration
///
/// Profiles built from managed policy carry no `id` until the profile
/// store accepts them.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VpnProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ProfileId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub vpn_type: VpnType,
}

impl VpnProfile {
    /// Copy of this profile carrying the given store identifier
    pub fn with_id(&self, id: ProfileId) -> Self {
        Self {
            id: Some(id),
            ..self.clone()
        }
    }

    /// Name for log lines; unnamed profiles show as `<unnamed>`
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

impl fmt::Debug for VpnProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VpnProfile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("gateway", &self.gateway)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("vpn_type", &self.vpn_type)
            .finish()
    }
}
