//! One reconcile step of a (node, policy) pair

use log::{error, info};

use nmstate_config::HandlerConfig;
use nmstate_core::{ApplyError, State};
use nmstate_enactment::ConditionManager;

use crate::transaction::NmstateApplier;

/// Applies a policy's desired state and reports the outcome
#[derive(Clone)]
pub struct PolicyEnactor {
    applier: NmstateApplier,
}

impl PolicyEnactor {
    pub fn new(applier: NmstateApplier) -> Self {
        Self { applier }
    }

    pub fn applier(&self) -> &NmstateApplier {
        &self.applier
    }

    /// Mark the enactment progressing, apply, then mark it available or
    /// failing. Status write failures never change the returned result.
    pub async fn enact(
        &self,
        desired: &State,
        config: &HandlerConfig,
        conditions: &ConditionManager,
    ) -> Result<String, ApplyError> {
        conditions.notify_progressing().await;

        match self.applier.apply(desired, config).await {
            Ok(output) => {
                info!("Enactment {} configured: {}", conditions.key(), output.trim());
                conditions.notify_success().await;
                Ok(output)
            }
            Err(e) => {
                error!("Enactment {} failed to configure: {}", conditions.key(), e);
                conditions.notify_failed_to_configure(&e).await;
                Err(e)
            }
        }
    }
}
