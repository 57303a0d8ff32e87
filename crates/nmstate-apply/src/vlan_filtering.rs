//! Vlan filtering enforcement on desired bridges
//!
//! NetworkManager does not configure vlan filtering on linux bridges yet, so
//! every bridge brought up by a desired state is handed to an external
//! helper together with its ports.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};

use crate::nmstatectl::{run_command, DEFAULT_OPERATION_TIMEOUT};
use nmstate_core::{CommandError, State, StateView, VlanFilteringError};

/// Helper applying vlan filtering to one bridge and its ports
#[async_trait]
pub trait VlanFilteringHelper: Send + Sync {
    async fn apply(&self, bridge: &str, ports: &[String]) -> Result<String, CommandError>;
}

/// `vlan-filtering <bridge> <port>...` subprocess
#[derive(Debug, Clone)]
pub struct VlanFilteringCommand {
    program: String,
    operation_timeout: Duration,
}

impl VlanFilteringCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }
}

impl Default for VlanFilteringCommand {
    fn default() -> Self {
        Self::new("vlan-filtering")
    }
}

#[async_trait]
impl VlanFilteringHelper for VlanFilteringCommand {
    async fn apply(&self, bridge: &str, ports: &[String]) -> Result<String, CommandError> {
        let mut args = Vec::with_capacity(ports.len() + 1);
        args.push(bridge.to_string());
        args.extend(ports.iter().cloned());
        run_command(&self.program, &args, None, self.operation_timeout).await
    }
}

/// Applies vlan filtering to every bridge a desired state brings up
#[derive(Clone)]
pub struct VlanFilterEnforcer {
    helper: Arc<dyn VlanFilteringHelper>,
}

impl VlanFilterEnforcer {
    pub fn new(helper: Arc<dyn VlanFilteringHelper>) -> Self {
        Self { helper }
    }

    /// Run the helper for each up bridge, in document order. The first
    /// failure stops processing; remaining bridges are not attempted.
    pub async fn enforce(&self, desired: &State) -> Result<String, VlanFilteringError> {
        let view = StateView::parse(desired)?;
        let mut output = String::new();

        for (bridge, ports) in view.bridges_up() {
            info!("Enforcing vlan filtering on bridge {} ports {:?}", bridge, ports);
            match self.helper.apply(&bridge, &ports).await {
                Ok(helper_output) => {
                    output.push_str(&format!(
                        "bridge {} ports {:?} vlan-filtering output: {}\n",
                        bridge, ports, helper_output
                    ));
                }
                Err(source) => {
                    warn!("Vlan filtering failed on bridge {}: {}", bridge, source);
                    return Err(VlanFilteringError::Helper {
                        bridge,
                        ports,
                        output,
                        source,
                    });
                }
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHelper {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl VlanFilteringHelper for RecordingHelper {
        async fn apply(&self, bridge: &str, ports: &[String]) -> Result<String, CommandError> {
            self.calls
                .lock()
                .unwrap()
                .push((bridge.to_string(), ports.to_vec()));
            if self.fail_on.as_deref() == Some(bridge) {
                return Err(CommandError::Failed {
                    command: format!("vlan-filtering {}", bridge),
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: "bridge vlan add failed".to_string(),
                });
            }
            Ok(format!("{} done", bridge))
        }
    }

    const TWO_BRIDGES: &str = r#"
interfaces:
  - name: br1
    type: linux-bridge
    state: up
    bridge:
      port:
        - name: eth1
  - name: br2
    type: linux-bridge
    state: up
    bridge:
      port:
        - name: eth2
        - name: eth3
  - name: br3
    type: linux-bridge
    state: absent
"#;

    #[tokio::test]
    async fn test_enforce_calls_helper_per_up_bridge() {
        let helper = Arc::new(RecordingHelper::default());
        let enforcer = VlanFilterEnforcer::new(helper.clone());

        let output = enforcer.enforce(&State::from(TWO_BRIDGES)).await.unwrap();

        let calls = helper.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ("br1".to_string(), vec!["eth1".to_string()]),
                (
                    "br2".to_string(),
                    vec!["eth2".to_string(), "eth3".to_string()]
                ),
            ]
        );
        assert!(output.contains("br1 done"));
        assert!(output.contains("br2 done"));
    }

    #[tokio::test]
    async fn test_first_failure_stops_processing() {
        let helper = Arc::new(RecordingHelper {
            fail_on: Some("br1".to_string()),
            ..Default::default()
        });
        let enforcer = VlanFilterEnforcer::new(helper.clone());

        let err = enforcer
            .enforce(&State::from(TWO_BRIDGES))
            .await
            .unwrap_err();

        assert!(matches!(err, VlanFilteringError::Helper { ref bridge, .. } if bridge == "br1"));
        assert_eq!(helper.calls.lock().unwrap().len(), 1);
        assert!(err.to_string().contains("bridge vlan add failed"));
    }

    #[tokio::test]
    async fn test_unparseable_desired_state_is_an_error() {
        let helper = Arc::new(RecordingHelper::default());
        let enforcer = VlanFilterEnforcer::new(helper.clone());

        let err = enforcer
            .enforce(&State::from("interfaces: [br1"))
            .await
            .unwrap_err();
        assert!(matches!(err, VlanFilteringError::DesiredState(_)));
        assert!(helper.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_helper_command_receives_positional_arguments() {
        let helper = VlanFilteringCommand::new("echo");
        let output = helper
            .apply("br1", &["eth1".to_string(), "eth2".to_string()])
            .await
            .unwrap();
        assert_eq!(output, "br1 eth1 eth2\n");
    }
}
