//! Default-profile reconciliation
//!
//! Compares the profile described by managed policy with the current
//! default profile and applies the smallest change that makes them agree:
//!
//! 1. Load the saved default (pointer → profile store)
//! 2. Build the policy profile from the current restrictions
//! 3. Matching profiles: nothing is written
//! 4. Otherwise: insert new → move pointer → delete old
//!
//! # Commit Ordering
//!
//! The old default is only removed once the pointer names the new one, so
//! a failed swap leaves the previous default in place instead of leaving
//! the device without one. A failed swap is reported as
//! [`Reconciliation::CommitFailed`] and retried on the next trigger.
//!
//! # Serialization
//!
//! `&mut self` keeps calls on one reconciler apart. Reconcilers in other
//! processes sharing the same stores are kept apart by a [`StoreLock`]
//! held for the whole load-decide-commit sequence.

use crate::policy::{PolicyError, PolicySnapshot, PolicySource};
use crate::profile::{ProfileId, VpnProfile};
use crate::store::{PreferenceStore, ProfileStore, StoreError, StoreLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Profile storage unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("Managed policy unavailable: {0}")]
    PolicyUnavailable(#[from] PolicyError),
}

/// Why a replacement default could not be committed
#[derive(Error, Debug)]
pub enum CommitError {
    #[error("Failed to store new profile: {0}")]
    InsertFailed(StoreError),
    #[error("Failed to update default profile pointer: {0}")]
    PointerFailed(StoreError),
}

/// Decides whether the policy profile is the same as the saved default
pub trait ProfileMatcher {
    fn name(&self) -> &str;
    fn matches(&self, saved: &VpnProfile, candidate: &VpnProfile) -> bool;
}

/// Built-in comparison strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    /// Same `name` means same profile, even if gateway or credentials moved
    #[default]
    Name,
    /// Every connection attribute must agree; identifiers are ignored
    Attributes,
}

impl ProfileMatcher for MatchStrategy {
    fn name(&self) -> &str {
        match self {
            MatchStrategy::Name => "name",
            MatchStrategy::Attributes => "attributes",
        }
    }

    fn matches(&self, saved: &VpnProfile, candidate: &VpnProfile) -> bool {
        match self {
            MatchStrategy::Name => saved.name == candidate.name,
            MatchStrategy::Attributes => {
                saved.name == candidate.name
                    && saved.gateway == candidate.gateway
                    && saved.username == candidate.username
                    && saved.password == candidate.password
                    && saved.vpn_type == candidate.vpn_type
            }
        }
    }
}

/// What to do with the saved default once managed policy disappears
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    /// Leave the saved default in place
    #[default]
    Keep,
    /// Clear the pointer and delete the saved profile
    Clear,
}

/// Outcome of one reconciliation
#[derive(Debug)]
pub enum Reconciliation {
    /// Policy matches the saved default; nothing written
    Unchanged(VpnProfile),
    /// No managed policy installed; saved default (if any) left alone
    PolicyAbsent(Option<VpnProfile>),
    /// No managed policy installed; the saved default was removed
    Cleared(VpnProfile),
    /// Policy profile is now the default
    Installed {
        profile: VpnProfile,
        replaced: Option<VpnProfile>,
    },
    /// Policy profile could not be committed; the previous default stands
    CommitFailed {
        profile: VpnProfile,
        error: CommitError,
    },
}

impl Reconciliation {
    /// Profile the connection service should use
    ///
    /// For a failed commit this is still the policy profile, for
    /// best-effort use by the caller.
    pub fn active_profile(&self) -> Option<&VpnProfile> {
        match self {
            Reconciliation::Unchanged(profile) => Some(profile),
            Reconciliation::PolicyAbsent(saved) => saved.as_ref(),
            Reconciliation::Cleared(_) => None,
            Reconciliation::Installed { profile, .. } => Some(profile),
            Reconciliation::CommitFailed { profile, .. } => Some(profile),
        }
    }

    /// False when persisted state does not yet reflect the policy
    pub fn is_committed(&self) -> bool {
        !matches!(self, Reconciliation::CommitFailed { .. })
    }
}

impl fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reconciliation::Unchanged(profile) => {
                write!(f, "unchanged, default is {}", profile.display_name())
            }
            Reconciliation::PolicyAbsent(Some(saved)) => write!(
                f,
                "no managed policy, keeping {}",
                saved.display_name()
            ),
            Reconciliation::PolicyAbsent(None) => write!(f, "no managed policy, no default"),
            Reconciliation::Cleared(old) => {
                write!(f, "no managed policy, removed {}", old.display_name())
            }
            Reconciliation::Installed { profile, replaced } => {
                write!(f, "installed {}", profile.display_name())?;
                if let Some(old) = replaced {
                    write!(f, " (replaced {})", old.display_name())?;
                }
                Ok(())
            }
            Reconciliation::CommitFailed { profile, error } => {
                write!(f, "failed to install {}: {}", profile.display_name(), error)
            }
        }
    }
}

/// Brings the default profile in line with managed policy
///
/// Takes `&mut self`, so calls on one reconciler never overlap.
pub struct Reconciler<S, P, Q> {
    profiles: S,
    preferences: P,
    policy: Q,
    matcher: Box<dyn ProfileMatcher + Send>,
    on_policy_removed: RemovalPolicy,
    lock: Option<(PathBuf, Duration)>,
}

impl<S, P, Q> Reconciler<S, P, Q>
where
    S: ProfileStore,
    P: PreferenceStore,
    Q: PolicySource,
{
    pub fn new(profiles: S, preferences: P, policy: Q) -> Self {
        Self {
            profiles,
            preferences,
            policy,
            matcher: Box::new(MatchStrategy::default()),
            on_policy_removed: RemovalPolicy::default(),
            lock: None,
        }
    }

    /// Hold the lock file at `path` around every store access
    pub fn with_lock(mut self, path: PathBuf, timeout: Duration) -> Self {
        self.lock = Some((path, timeout));
        self
    }

    pub fn with_matcher(mut self, matcher: impl ProfileMatcher + Send + 'static) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    pub fn with_removal_policy(mut self, on_policy_removed: RemovalPolicy) -> Self {
        self.on_policy_removed = on_policy_removed;
        self
    }

    pub fn profiles(&self) -> &S {
        &self.profiles
    }

    pub fn preferences(&self) -> &P {
        &self.preferences
    }

    pub fn policy(&self) -> &Q {
        &self.policy
    }

    /// Run one reconciliation against the current policy
    ///
    /// Errors are only returned when the lock, a store or the policy cannot
    /// be read; nothing has been written at that point.
    pub fn reconcile(&mut self) -> Result<Reconciliation, ReconcileError> {
        let _lock = self.acquire_lock()?;
        let snapshot = self.policy.snapshot()?;
        self.apply(snapshot)
    }

    /// Run one reconciliation against a snapshot the caller already read
    pub fn reconcile_snapshot(
        &mut self,
        snapshot: Option<PolicySnapshot>,
    ) -> Result<Reconciliation, ReconcileError> {
        let _lock = self.acquire_lock()?;
        self.apply(snapshot)
    }

    /// Current default, or `None` if the pointer is unset or dangling
    pub fn saved_profile(&self) -> Result<Option<VpnProfile>, StoreError> {
        let _lock = self.acquire_lock()?;
        Ok(self.load_saved()?.1)
    }

    fn acquire_lock(&self) -> Result<Option<StoreLock>, StoreError> {
        self.lock
            .as_ref()
            .map(|(path, timeout)| StoreLock::acquire(path, *timeout))
            .transpose()
    }

    fn apply(
        &mut self,
        snapshot: Option<PolicySnapshot>,
    ) -> Result<Reconciliation, ReconcileError> {
        let (pointer, saved) = self.load_saved()?;
        let candidate = snapshot.map(|s| s.to_profile());

        match (saved, candidate) {
            (Some(saved), Some(candidate)) if self.matcher.matches(&saved, &candidate) => {
                debug!(
                    "Policy profile {} matches saved default ({} comparison)",
                    candidate.display_name(),
                    self.matcher.name()
                );
                Ok(Reconciliation::Unchanged(saved))
            }
            (saved, None) => self.handle_policy_absent(pointer, saved),
            (saved, Some(candidate)) => Ok(self.install(candidate, saved)),
        }
    }

    /// Pointer value and the profile it resolves to
    fn load_saved(&self) -> Result<(Option<ProfileId>, Option<VpnProfile>), StoreError> {
        let Some(id) = self.preferences.default_profile_id()? else {
            debug!("No default profile configured");
            return Ok((None, None));
        };

        let profile = self.profiles.get(&id)?;
        if profile.is_none() {
            warn!("Default profile {} is missing from the profile store", id);
        }
        Ok((Some(id), profile))
    }

    fn handle_policy_absent(
        &mut self,
        pointer: Option<ProfileId>,
        saved: Option<VpnProfile>,
    ) -> Result<Reconciliation, ReconcileError> {
        match (self.on_policy_removed, saved) {
            (RemovalPolicy::Clear, Some(saved)) => {
                self.preferences.clear_default_profile_id()?;
                if let Some(id) = &saved.id {
                    if let Err(e) = self.profiles.delete(id) {
                        warn!("Failed to delete former default {}: {}", id, e);
                    }
                }
                info!(
                    "Managed policy removed, cleared default {}",
                    saved.display_name()
                );
                Ok(Reconciliation::Cleared(saved))
            }
            (RemovalPolicy::Clear, None) if pointer.is_some() => {
                self.preferences.clear_default_profile_id()?;
                info!("Managed policy removed, cleared dangling default pointer");
                Ok(Reconciliation::PolicyAbsent(None))
            }
            (_, saved) => {
                debug!("No managed policy, leaving default profile as is");
                Ok(Reconciliation::PolicyAbsent(saved))
            }
        }
    }

    fn install(&mut self, candidate: VpnProfile, saved: Option<VpnProfile>) -> Reconciliation {
        let id = match self.profiles.insert(&candidate) {
            Ok(id) => id,
            Err(e) => {
                error!(
                    "Could not store policy profile {}: {}",
                    candidate.display_name(),
                    e
                );
                return Reconciliation::CommitFailed {
                    profile: candidate,
                    error: CommitError::InsertFailed(e),
                };
            }
        };

        if let Err(e) = self.preferences.set_default_profile_id(&id) {
            error!(
                "Could not make {} the default profile: {}",
                candidate.display_name(),
                e
            );
            if let Err(rollback) = self.profiles.delete(&id) {
                warn!("Failed to remove unreferenced profile {}: {}", id, rollback);
            }
            return Reconciliation::CommitFailed {
                profile: candidate,
                error: CommitError::PointerFailed(e),
            };
        }

        info!("Default VPN profile updated to {}", candidate.display_name());

        if let Some(old_id) = saved.as_ref().and_then(|p| p.id.as_ref()) {
            if let Err(e) = self.profiles.delete(old_id) {
                warn!("Failed to delete replaced profile {}: {}", old_id, e);
            }
        }

        Reconciliation::Installed {
            profile: candidate.with_id(id),
            replaced: saved,
        }
    }
}
