//! Error types for node network operations

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failure of an external command (nmstatectl, vlan-filtering, ping)
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to execute {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write input into {command}: {source}")]
    Stdin {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed with exit code {}: '{stdout}' '{stderr}'", display_code(.exit_code))]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (killed by signal)".to_string(),
    }
}

/// State document parsing and serialization errors
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to parse state document: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("failed to serialize state document: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("unexpected state document layout: {0}")]
    Layout(String),
}

/// Invalid interface filter glob
#[derive(Debug, Error)]
#[error("invalid interface filter '{pattern}': {message}")]
pub struct PatternError {
    pub pattern: String,
    pub message: String,
}

/// Vlan filtering enforcement errors
#[derive(Debug, Error)]
pub enum VlanFilteringError {
    #[error("error retrieving up bridges from desired state: {0}")]
    DesiredState(#[from] StateError),

    #[error("bridge {bridge} ports {ports:?}: {source}")]
    Helper {
        bridge: String,
        ports: Vec<String>,
        /// Output collected from the bridges processed before this one
        output: String,
        #[source]
        source: CommandError,
    },
}

/// Outcome of the rollback command issued after a failed transaction step
#[derive(Debug)]
pub enum RollbackOutcome {
    RolledBack(String),
    Failed(CommandError),
}

impl RollbackOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, RollbackOutcome::RolledBack(_))
    }
}

impl fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackOutcome::RolledBack(output) => write!(f, "rolled back: '{}'", output.trim()),
            RollbackOutcome::Failed(err) => write!(f, "rollback failed: {}", err),
        }
    }
}

/// Failure of a staged apply transaction
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("failed to stage desired state: {0}")]
    Staging(#[source] CommandError),

    #[error("failed to enforce vlan filtering: {0}")]
    VlanEnforcement(#[from] VlanFilteringError),

    #[error("default gateway not found in current state within {timeout:?}")]
    GatewayUnavailable { timeout: Duration },

    #[error(
        "error pinging default gateway {gateway} after network reconfiguration: \
         not reachable within {timeout:?}, currentState: {current_state}"
    )]
    GatewayUnreachable {
        gateway: String,
        timeout: Duration,
        current_state: String,
    },

    #[error(
        "error checking api server connectivity after network reconfiguration: \
         not reachable within {timeout:?}, currentState: {current_state}"
    )]
    ControlPlaneUnreachable {
        timeout: Duration,
        current_state: String,
    },

    #[error("failed to commit desired state: {0}")]
    Commit(#[source] CommandError),

    #[error("apply transaction {transaction_id} did not run to completion: {message}")]
    Interrupted {
        transaction_id: String,
        message: String,
    },

    #[error("rollback cause: {cause}, rollback result: {outcome}")]
    Rollback {
        cause: Box<ApplyError>,
        outcome: RollbackOutcome,
    },
}

impl ApplyError {
    /// The failure that started it all, looking through rollback wrappers
    pub fn root_cause(&self) -> &ApplyError {
        match self {
            ApplyError::Rollback { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    pub fn rolled_back(&self) -> bool {
        matches!(self, ApplyError::Rollback { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_rollback() -> CommandError {
        CommandError::Failed {
            command: "nmstatectl rollback".to_string(),
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "no checkpoint".to_string(),
        }
    }

    #[test]
    fn test_rollback_keeps_root_cause_when_rollback_fails() {
        let err = ApplyError::Rollback {
            cause: Box::new(ApplyError::GatewayUnavailable {
                timeout: Duration::from_secs(3),
            }),
            outcome: RollbackOutcome::Failed(failed_rollback()),
        };

        let text = err.to_string();
        assert!(text.starts_with("rollback cause: default gateway not found"));
        assert!(text.contains("rollback failed"));
        assert!(text.contains("no checkpoint"));
        assert!(matches!(
            err.root_cause(),
            ApplyError::GatewayUnavailable { .. }
        ));
        assert!(err.rolled_back());
    }

    #[test]
    fn test_command_failure_renders_output() {
        let err = CommandError::Failed {
            command: "nmstatectl commit".to_string(),
            exit_code: None,
            stdout: "out".to_string(),
            stderr: "err".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "nmstatectl commit failed with exit code none (killed by signal): 'out' 'err'"
        );
    }
}
