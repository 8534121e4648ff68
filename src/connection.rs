//! Hand-off to the connection service
//!
//! After every policy change the connection service must be running. What
//! that service is belongs to the operator: the configured command is run
//! with the active profile described in its environment.
//!
//! | Variable | Example |
//! |----------|---------|
//! | `MANAGED_VPN_PROFILE_ID` | `7c9e6679-...` |
//! | `MANAGED_VPN_PROFILE_NAME` | `Corp` |
//! | `MANAGED_VPN_GATEWAY` | `vpn.example.com` |

use crate::profile::VpnProfile;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

pub const ENV_PROFILE_ID: &str = "MANAGED_VPN_PROFILE_ID";
pub const ENV_PROFILE_NAME: &str = "MANAGED_VPN_PROFILE_NAME";
pub const ENV_GATEWAY: &str = "MANAGED_VPN_GATEWAY";

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to launch {program}: {source}")]
    SpawnError {
        program: String,
        source: std::io::Error,
    },
    #[error("Connection command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
}

pub trait ConnectionService {
    fn ensure_running(&self, profile: Option<&VpnProfile>) -> Result<(), ConnectionError>;
}

/// Runs an operator-supplied command; an empty command does nothing
pub struct CommandConnectionService {
    command: Vec<String>,
}

impl CommandConnectionService {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn build(&self, program: &str, args: &[String], profile: Option<&VpnProfile>) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args);

        let vars = [
            (
                ENV_PROFILE_ID,
                profile.and_then(|p| p.id.as_ref()).map(|id| id.to_string()),
            ),
            (ENV_PROFILE_NAME, profile.and_then(|p| p.name.clone())),
            (ENV_GATEWAY, profile.and_then(|p| p.gateway.clone())),
        ];
        for (key, value) in vars {
            match value {
                Some(value) => cmd.env(key, value),
                None => cmd.env_remove(key),
            };
        }
        cmd
    }
}

impl ConnectionService for CommandConnectionService {
    fn ensure_running(&self, profile: Option<&VpnProfile>) -> Result<(), ConnectionError> {
        let Some((program, args)) = self.command.split_first() else {
            debug!("No connection command configured");
            return Ok(());
        };

        let output = self
            .build(program, args, profile)
            .output()
            .map_err(|source| ConnectionError::SpawnError {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConnectionError::CommandFailed {
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        info!("Connection service notified via {}", program);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileId;
    use std::ffi::OsStr;

    #[test]
    fn test_empty_command_is_noop() {
        let service = CommandConnectionService::new(vec![]);
        assert!(service.ensure_running(None).is_ok());
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let service =
            CommandConnectionService::new(vec!["managed-vpn-no-such-program".to_string()]);
        let result = service.ensure_running(None);
        assert!(matches!(result, Err(ConnectionError::SpawnError { .. })));
    }

    #[test]
    fn test_build_sets_profile_env() {
        let service = CommandConnectionService::new(vec![]);
        let profile = VpnProfile {
            name: Some("Corp".to_string()),
            ..VpnProfile::default()
        }
        .with_id(ProfileId::new("abc"));

        let cmd = service.build("true", &[], Some(&profile));
        let envs: Vec<_> = cmd.get_envs().collect();

        assert!(envs.contains(&(OsStr::new(ENV_PROFILE_ID), Some(OsStr::new("abc")))));
        assert!(envs.contains(&(OsStr::new(ENV_PROFILE_NAME), Some(OsStr::new("Corp")))));
        assert!(envs.contains(&(OsStr::new(ENV_GATEWAY), None)));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_success_and_failure() {
        let ok = CommandConnectionService::new(vec!["true".to_string()]);
        assert!(ok.ensure_running(None).is_ok());

        let failing = CommandConnectionService::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo boom >&2; exit 3".to_string(),
        ]);
        let err = failing.ensure_running(None).unwrap_err();
        assert!(matches!(err, ConnectionError::CommandFailed { .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_sees_profile_name() {
        let service = CommandConnectionService::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("test \"${}\" = Corp", ENV_PROFILE_NAME),
        ]);
        let profile = VpnProfile {
            name: Some("Corp".to_string()),
            ..VpnProfile::default()
        };
        assert!(service.ensure_running(Some(&profile)).is_ok());
    }
}
