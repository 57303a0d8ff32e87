//! Apply command

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use nmstate_apply::PolicyEnactor;
use nmstate_core::State;

use crate::context::HandlerContext;

/// Apply a desired state document on this node and record the outcome
pub struct ApplyCommand {
    context: Arc<HandlerContext>,
}

impl ApplyCommand {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Returns the collected command output of a successful apply
    pub async fn execute(&self, desired_path: &Path, node: &str, policy: &str) -> Result<String> {
        let raw = tokio::fs::read(desired_path)
            .await
            .with_context(|| format!("Failed to read desired state: {}", desired_path.display()))?;
        let desired = State::new(raw);

        let conditions = self.context.condition_manager(node, policy);
        conditions.initialize().await;

        info!(
            "Applying {} as policy {} on node {}",
            desired_path.display(),
            policy,
            node
        );
        let enactor = PolicyEnactor::new(self.context.applier.clone());
        let output = enactor
            .enact(&desired, &self.context.config, &conditions)
            .await
            .with_context(|| format!("Failed to apply policy {} on node {}", policy, node))?;

        Ok(output)
    }
}
