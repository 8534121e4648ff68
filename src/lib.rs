//! Managed VPN - default VPN profile driven by device-management policy
//!
//! An administrator pushes VPN settings to the device as managed
//! restrictions. This crate keeps the locally stored default VPN profile in
//! line with those restrictions, writing only when the policy describes a
//! different profile.
//!
//! # Architecture
//!
//! - `profile`: VPN profile records
//! - `policy`: Managed restrictions and the profile they describe
//! - `store`: Profile and default-pointer persistence (JSON files)
//! - `reconcile`: Decides and applies the default-profile update
//! - `connection`: Hand-off to the connection service
//! - `trigger`: Policy-changed handling and the watch loop
//! - `config`: Configuration file handling (TOML)
//!
//! # Usage
//!
//! Called by the device-management agent whenever restrictions change:
//! ```bash
//! managed-vpn reconcile
//! ```

pub mod config;
pub mod connection;
pub mod policy;
pub mod profile;
pub mod reconcile;
pub mod store;
pub mod trigger;

pub use config::Config;
pub use policy::{PolicySnapshot, PolicySource};
pub use profile::{ProfileId, VpnProfile, VpnType};
pub use reconcile::{MatchStrategy, ProfileMatcher, Reconciler, Reconciliation};
pub use trigger::handle_policy_changed;
