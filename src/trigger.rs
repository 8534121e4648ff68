//! Policy-changed trigger handling
//!
//! A trigger reconciles once and then makes sure the connection service is
//! running, whatever the reconciliation outcome:
//!
//! 1. Open the file stores and the policy source named in the config
//! 2. Reconcile the default profile against the managed policy
//! 3. Hand the active profile (if any) to the connection service
//!
//! `watch` turns this into a long-running loop. Every reconciler built here
//! holds the store lock for the whole reconciliation, so triggers from
//! different processes never overlap.
//!
//! # Error Handling
//!
//! Reconciliation errors are logged once here and returned to the caller.
//! Connection service failures are logged; the persisted default is
//! already correct by then.

use crate::config::Config;
use crate::connection::{CommandConnectionService, ConnectionService};
use crate::policy::{FilePolicySource, PolicySnapshot, PolicySource};
use crate::reconcile::{ReconcileError, Reconciler, Reconciliation};
use crate::store::{FilePreferenceStore, FileProfileStore, PreferenceStore, ProfileStore};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Reconciliation failed: {0}")]
    ReconcileError(#[from] ReconcileError),
    #[error("Failed to listen for shutdown signal: {0}")]
    SignalError(std::io::Error),
}

pub type FileReconciler = Reconciler<FileProfileStore, FilePreferenceStore, FilePolicySource>;

/// Reconciler over the file stores and policy source named in `config`
pub fn build_reconciler(config: &Config) -> FileReconciler {
    Reconciler::new(
        FileProfileStore::with_path(config.storage.profiles.clone()),
        FilePreferenceStore::with_path(config.storage.preferences.clone()),
        FilePolicySource::with_path(config.policy.path.clone()),
    )
    .with_matcher(config.policy.match_strategy)
    .with_removal_policy(config.policy.on_policy_removed)
    .with_lock(config.storage.lock_path(), config.storage.lock_timeout())
}

/// Main entry point for a single policy-changed notification
pub fn handle_policy_changed(config: &Config) -> Result<Reconciliation, TriggerError> {
    let mut reconciler = build_reconciler(config);
    let service = CommandConnectionService::new(config.connection.command.clone());
    run_trigger(&mut reconciler, &service)
}

/// Reconcile, then notify the connection service
pub fn run_trigger<S, P, Q>(
    reconciler: &mut Reconciler<S, P, Q>,
    service: &dyn ConnectionService,
) -> Result<Reconciliation, TriggerError>
where
    S: ProfileStore,
    P: PreferenceStore,
    Q: PolicySource,
{
    let result = reconciler.reconcile();
    notify(result, service)
}

/// Process exit code for a trigger result
///
/// Only a committed outcome counts as success, so the invoking agent
/// retries after a failed commit.
pub fn exit_code(result: &Result<Reconciliation, TriggerError>) -> i32 {
    match result {
        Ok(outcome) if outcome.is_committed() => 0,
        _ => 1,
    }
}

fn notify(
    result: Result<Reconciliation, ReconcileError>,
    service: &dyn ConnectionService,
) -> Result<Reconciliation, TriggerError> {
    match &result {
        Ok(outcome) if outcome.is_committed() => info!("Policy change handled: {}", outcome),
        Ok(outcome) => warn!("Policy change not committed: {}", outcome),
        Err(e) => error!("Policy change not applied: {}", e),
    }

    let active = result.as_ref().ok().and_then(Reconciliation::active_profile);
    if let Err(e) = service.ensure_running(active) {
        error!("Failed to start connection service: {}", e);
    }

    result.map_err(TriggerError::from)
}

/// Decides when a polled policy needs a new trigger
///
/// Fires on the first poll, whenever the snapshot differs from the last
/// one that was committed, and again after any failed attempt.
#[derive(Debug, Default)]
pub struct PolicyWatcher {
    last_committed: Option<Option<PolicySnapshot>>,
}

impl PolicyWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poll once; returns the trigger result if a trigger ran
    pub fn poll<S, P, Q>(
        &mut self,
        reconciler: &mut Reconciler<S, P, Q>,
        service: &dyn ConnectionService,
    ) -> Option<Result<Reconciliation, TriggerError>>
    where
        S: ProfileStore,
        P: PreferenceStore,
        Q: PolicySource,
    {
        let snapshot = match reconciler.policy().snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Failed to read managed policy: {}", e);
                self.last_committed = None;
                return None;
            }
        };

        if self.last_committed.as_ref() == Some(&snapshot) {
            debug!("Managed policy unchanged");
            return None;
        }

        let result = notify(reconciler.reconcile_snapshot(snapshot.clone()), service);
        self.last_committed = match &result {
            Ok(outcome) if outcome.is_committed() => Some(snapshot),
            _ => None,
        };
        Some(result)
    }
}

/// Poll the managed policy until Ctrl+C
pub async fn watch(config: &Config) -> Result<(), TriggerError> {
    watch_until(config, async {
        tokio::signal::ctrl_c()
            .await
            .map_err(TriggerError::SignalError)
    })
    .await
}

/// Poll the managed policy until `shutdown` completes
pub async fn watch_until<F>(config: &Config, shutdown: F) -> Result<(), TriggerError>
where
    F: Future<Output = Result<(), TriggerError>>,
{
    let mut reconciler = build_reconciler(config);
    let service = CommandConnectionService::new(config.connection.command.clone());
    let mut watcher = PolicyWatcher::new();

    let mut interval = tokio::time::interval(config.policy.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    info!(
        "Watching {} every {:?}",
        config.policy.path.display(),
        config.policy.poll_interval()
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Some(Err(e)) = watcher.poll(&mut reconciler, &service) {
                    debug!("Will retry on next poll: {}", e);
                }
            }
            result = &mut shutdown => {
                result?;
                info!("Shutdown requested, stopping watch");
                return Ok(());
            }
        }
    }
}
