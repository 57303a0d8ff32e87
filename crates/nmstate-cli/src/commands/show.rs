//! Show command

use std::sync::Arc;

use anyhow::{Context, Result};

use nmstate_apply::NodeStateRefresher;
use nmstate_core::InterfaceFilter;
use nmstate_shared_types::NodeNetworkState;

use super::OutputFormat;
use crate::context::HandlerContext;

/// Print the observed node state as it would be reported
pub struct ShowCommand {
    context: Arc<HandlerContext>,
}

impl ShowCommand {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    pub async fn execute(&self, node: &str, unfiltered: bool, format: OutputFormat) -> Result<String> {
        let filter = if unfiltered {
            InterfaceFilter::new("")?
        } else {
            self.context.config.interface_filter()?
        };

        let refresher = NodeStateRefresher::new(self.context.applier.tool(), node);
        let snapshot = refresher
            .refresh(&filter)
            .await
            .context("Failed to retrieve current node state")?;

        render_node_state(&snapshot, format)
    }
}

pub fn render_node_state(snapshot: &NodeNetworkState, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(snapshot.current_state.to_text()),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(snapshot)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(snapshot)?),
    }
}
