//! Periodic observed node state reporting

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::sleep;

use nmstate_config::{ConfigError, HandlerConfig};
use nmstate_core::{filter_out, CommandError, InterfaceFilter, State};
use nmstate_shared_types::NodeNetworkState;

use crate::nmstatectl::NetworkTool;

/// Reads the live state of one node and filters it for reporting
#[derive(Clone)]
pub struct NodeStateRefresher {
    tool: Arc<dyn NetworkTool>,
    node: String,
}

impl NodeStateRefresher {
    pub fn new(tool: Arc<dyn NetworkTool>, node: impl Into<String>) -> Self {
        Self {
            tool,
            node: node.into(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Current state with interfaces matching `filter` removed
    pub async fn refresh(&self, filter: &InterfaceFilter) -> Result<NodeNetworkState, CommandError> {
        let observed = State::from(self.tool.show().await?);

        Ok(NodeNetworkState {
            node: self.node.clone(),
            current_state: filter_out(&observed, filter),
            last_successful_update_time: Utc::now(),
        })
    }

    /// Refresh every `node_network_state_refresh_interval` and hand each
    /// snapshot to `publish` until `true` is sent on `stop_rx` or its sender
    /// goes away. A failed refresh is logged and retried next interval.
    pub async fn run<F>(
        &self,
        config: &HandlerConfig,
        mut stop_rx: watch::Receiver<bool>,
        mut publish: F,
    ) -> Result<(), ConfigError>
    where
        F: FnMut(NodeNetworkState) + Send,
    {
        let filter = config.interface_filter()?;
        let interval = config.refresh_interval();
        info!(
            "Refreshing node {} state every {:?}, filtering '{}'",
            self.node,
            interval,
            filter.pattern()
        );

        while !*stop_rx.borrow() {
            match self.refresh(&filter).await {
                Ok(snapshot) => {
                    debug!("Node {} state refreshed", self.node);
                    publish(snapshot);
                }
                Err(e) => warn!("Failed to refresh node {} state: {}", self.node, e),
            }

            tokio::select! {
                _ = sleep(interval) => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Stopped refreshing node {} state", self.node);
        Ok(())
    }
}
