//! Staged network configuration transactions
//!
//! A desired state is staged as an nmstate checkpoint, vlan filtering is
//! enforced on its bridges and connectivity is verified before the checkpoint
//! is committed. Any failure after staging and before the commit rolls the
//! checkpoint back.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use nmstate_config::HandlerConfig;
use nmstate_core::{ApplyError, RollbackOutcome, State, StateView};

use crate::nmstatectl::{NetworkTool, Nmstatectl};
use crate::probe::{poll_for, ApiServerCheck, ConnectivityProbe, PingCheck};
use crate::vlan_filtering::{VlanFilterEnforcer, VlanFilteringCommand};

/// Returned when the desired state carries no document at all
pub const EMPTY_DESIRED_STATE_MESSAGE: &str = "Ignoring empty desired state";

/// Transaction states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransactionState {
    Created,
    Staging,
    EnforcingVlanFiltering,
    DiscoveringGateway,
    ProbingGateway,
    ProbingControlPlane,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    Failed,
}

/// Network applier with staged transaction support
#[derive(Clone)]
pub struct NmstateApplier {
    tool: Arc<dyn NetworkTool>,
    vlan: VlanFilterEnforcer,
    probe: ConnectivityProbe,
}

impl NmstateApplier {
    pub fn new(tool: Arc<dyn NetworkTool>, vlan: VlanFilterEnforcer, probe: ConnectivityProbe) -> Self {
        Self { tool, vlan, probe }
    }

    /// Applier over the real nmstatectl, vlan-filtering and ping commands
    pub fn from_config(config: &HandlerConfig) -> Self {
        let tool = Arc::new(Nmstatectl::new(config.commands.nmstatectl.clone()));
        let vlan = VlanFilterEnforcer::new(Arc::new(VlanFilteringCommand::new(
            config.commands.vlan_filtering.clone(),
        )));
        let probe = ConnectivityProbe::new(
            Arc::new(PingCheck::new(config.commands.ping.clone())),
            Arc::new(ApiServerCheck::new(config.api_server.clone())),
        )
        .with_interval(config.probe_interval());

        Self::new(tool, vlan, probe)
    }

    pub fn tool(&self) -> Arc<dyn NetworkTool> {
        self.tool.clone()
    }

    /// Apply `desired` to this node, returning the collected command output.
    ///
    /// The transaction runs on its own task: once started it finishes (and
    /// rolls back if needed) even when the returned future is dropped.
    /// Callers must not run two applies on the same node at once.
    pub async fn apply(&self, desired: &State, config: &HandlerConfig) -> Result<String, ApplyError> {
        if desired.is_empty() {
            info!("{}", EMPTY_DESIRED_STATE_MESSAGE);
            return Ok(EMPTY_DESIRED_STATE_MESSAGE.to_string());
        }

        let transaction = Transaction::new(self, desired.clone(), config.clone());
        let transaction_id = transaction.id.clone();

        match tokio::spawn(transaction.run()).await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => std::panic::resume_unwind(join_err.into_panic()),
            Err(join_err) => {
                error!("Transaction {} was aborted: {}", transaction_id, join_err);
                Err(ApplyError::Interrupted {
                    transaction_id,
                    message: join_err.to_string(),
                })
            }
        }
    }
}

/// One apply attempt
struct Transaction {
    id: String,
    state: TransactionState,
    tool: Arc<dyn NetworkTool>,
    vlan: VlanFilterEnforcer,
    probe: ConnectivityProbe,
    desired: State,
    config: HandlerConfig,
}

impl Transaction {
    fn new(applier: &NmstateApplier, desired: State, config: HandlerConfig) -> Self {
        let probe = applier
            .probe
            .clone()
            .with_interval(config.probe_interval());

        Self {
            id: generate_transaction_id(),
            state: TransactionState::Created,
            tool: applier.tool.clone(),
            vlan: applier.vlan.clone(),
            probe,
            desired,
            config,
        }
    }

    fn transition(&mut self, next: TransactionState) {
        debug!("Transaction {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    async fn run(mut self) -> Result<String, ApplyError> {
        let start_time = Instant::now();
        info!("Applying transaction {}", self.id);

        self.transition(TransactionState::Staging);
        let staged = self
            .tool
            .set(&self.desired, self.config.stage_timeout())
            .await;
        // No checkpoint exists when staging fails, so there is nothing to revert
        let set_output = match staged {
            Ok(output) => output,
            Err(e) => {
                self.transition(TransactionState::Failed);
                error!("Transaction {} failed to stage: {}", self.id, e);
                return Err(ApplyError::Staging(e));
            }
        };

        self.transition(TransactionState::EnforcingVlanFiltering);
        let enforced = self.vlan.enforce(&self.desired).await;
        let vlan_output = match enforced {
            Ok(output) => output,
            Err(e) => return Err(self.rollback(e.into()).await),
        };

        if let Err(cause) = self.verify_connectivity().await {
            return Err(self.rollback(cause).await);
        }

        // A failed commit leaves the checkpoint to expire on its own
        self.transition(TransactionState::Committing);
        let committed = self.tool.commit().await;
        let commit_output = match committed {
            Ok(output) => output,
            Err(e) => {
                self.transition(TransactionState::Failed);
                error!("Transaction {} failed to commit: {}", self.id, e);
                return Err(ApplyError::Commit(e));
            }
        };

        self.transition(TransactionState::Committed);
        info!(
            "Transaction {} committed in {}ms",
            self.id,
            start_time.elapsed().as_millis()
        );

        Ok(format!(
            "{}commit output: {}\nset output: {}",
            vlan_output, commit_output, set_output
        ))
    }

    async fn verify_connectivity(&mut self) -> Result<(), ApplyError> {
        // Connectivity failures report the discovered document; the node may
        // be unreachable by then, so it is not read again
        self.transition(TransactionState::DiscoveringGateway);
        let (gateway, discovered_state) = self.discover_gateway().await?;
        info!("Transaction {} found default gateway {}", self.id, gateway);

        self.transition(TransactionState::ProbingGateway);
        let timeout = self.config.gateway_probe_timeout();
        if !self.probe.probe_gateway(&gateway, timeout).await {
            return Err(ApplyError::GatewayUnreachable {
                gateway,
                timeout,
                current_state: discovered_state,
            });
        }

        self.transition(TransactionState::ProbingControlPlane);
        let timeout = self.config.api_server_probe_timeout();
        if !self.probe.probe_control_plane(timeout).await {
            return Err(ApplyError::ControlPlaneUnreachable {
                timeout,
                current_state: discovered_state,
            });
        }

        Ok(())
    }

    /// Poll the live state until it has a running default route, returning
    /// the next hop together with the document it was read from
    async fn discover_gateway(&self) -> Result<(String, String), ApplyError> {
        let timeout = self.config.gateway_retrieve_timeout();
        let tool = self.tool.clone();

        let found = poll_for(self.probe.interval(), timeout, move || {
            let tool = tool.clone();
            async move {
                let current = match tool.show().await {
                    Ok(current) => current,
                    Err(e) => {
                        warn!("Failed retrieving current state: {}", e);
                        return None;
                    }
                };
                match StateView::parse(&State::from(current.as_str())) {
                    Ok(view) => view.default_gateway().map(|gateway| (gateway, current)),
                    Err(e) => {
                        warn!("Failed parsing current state: {}", e);
                        None
                    }
                }
            }
        })
        .await;

        found.ok_or(ApplyError::GatewayUnavailable { timeout })
    }

    async fn rollback(&mut self, cause: ApplyError) -> ApplyError {
        warn!(
            "Transaction {} failed while {:?}, rolling back: {}",
            self.id, self.state, cause
        );
        self.transition(TransactionState::RollingBack);

        let rolled_back = self.tool.rollback().await;
        let outcome = match rolled_back {
            Ok(output) => {
                self.transition(TransactionState::RolledBack);
                info!("Rolled back transaction {}", self.id);
                RollbackOutcome::RolledBack(output)
            }
            Err(e) => {
                self.transition(TransactionState::Failed);
                error!("Failed to roll back transaction {}: {}", self.id, e);
                RollbackOutcome::Failed(e)
            }
        };

        ApplyError::Rollback {
            cause: Box::new(cause),
            outcome,
        }
    }
}

fn generate_transaction_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("txn_{}", timestamp)
}
