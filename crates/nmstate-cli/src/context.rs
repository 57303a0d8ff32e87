//! Shared state for CLI commands

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::debug;

use nmstate_apply::NmstateApplier;
use nmstate_config::HandlerConfig;
use nmstate_enactment::{ConditionManager, EnactmentStore, FileEnactmentStore, RetryPolicy};

/// Where enactment records live when `--store-dir` is not given
pub const DEFAULT_STORE_DIR: &str = "/var/lib/nmstate/enactments";

/// Environment variable naming this node
pub const NODE_NAME_ENV: &str = "NODE_NAME";

/// Configuration snapshot, applier and status store used by every command
pub struct HandlerContext {
    pub config: HandlerConfig,
    pub applier: NmstateApplier,
    pub store: Arc<dyn EnactmentStore>,
}

impl HandlerContext {
    pub fn new(config: HandlerConfig, applier: NmstateApplier, store: Arc<dyn EnactmentStore>) -> Self {
        Self {
            config,
            applier,
            store,
        }
    }

    /// Load configuration and open the file store
    pub async fn bootstrap(config_path: Option<&Path>, store_dir: &Path) -> Result<Arc<Self>> {
        let config = match config_path {
            Some(path) => HandlerConfig::load_from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => HandlerConfig::load_with_defaults().context("Failed to load configuration")?,
        };
        debug!("Loaded configuration: {:?}", config);

        let store = FileEnactmentStore::new(store_dir)
            .await
            .with_context(|| format!("Failed to open enactment store {}", store_dir.display()))?;
        let applier = NmstateApplier::from_config(&config);

        Ok(Arc::new(Self::new(config, applier, Arc::new(store))))
    }

    /// Status reporter for one (node, policy) pair using the configured retry
    pub fn condition_manager(&self, node: &str, policy: &str) -> ConditionManager {
        let retry = RetryPolicy::new(self.config.status_retry.steps, self.config.status_backoff());
        ConditionManager::new(self.store.clone(), node, policy).with_retry_policy(retry)
    }
}

/// Node name from the command line, falling back to `NODE_NAME`
pub fn resolve_node(node: Option<String>) -> Result<String> {
    if let Some(node) = node {
        return Ok(node);
    }
    match std::env::var(NODE_NAME_ENV) {
        Ok(node) if !node.trim().is_empty() => Ok(node.trim().to_string()),
        _ => bail!("No node name given: pass --node or set {}", NODE_NAME_ENV),
    }
}
