//! Enactment condition reporting for one (node, policy) pair

use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, info};

use crate::retry::{update_with_retry, RetryPolicy};
use crate::store::{EnactmentStore, StoreError, StoreResult};
use nmstate_shared_types::{ConditionList, Enactment, EnactmentKey};

pub const PROGRESSING_MESSAGE: &str = "Applying desired state";
pub const SUCCESS_MESSAGE: &str = "successfully reconciled";

type ConditionSetter = fn(&mut ConditionList, &str, DateTime<Utc>);

/// Reports the outcome of configuration attempts as enactment conditions.
///
/// None of the `notify_*` calls fail: store errors are logged and dropped
/// so a lost status race never aborts reconciliation.
#[derive(Clone)]
pub struct ConditionManager {
    store: Arc<dyn EnactmentStore>,
    key: EnactmentKey,
    retry: RetryPolicy,
}

impl ConditionManager {
    pub fn new(
        store: Arc<dyn EnactmentStore>,
        node: impl Into<String>,
        policy: impl Into<String>,
    ) -> Self {
        Self {
            store,
            key: EnactmentKey::new(node, policy),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn key(&self) -> &EnactmentKey {
        &self.key
    }

    pub async fn notify_progressing(&self) {
        if let Err(err) = self
            .update_conditions(ConditionList::set_progressing, PROGRESSING_MESSAGE)
            .await
        {
            error!(
                "Error changing enactment {} state to progressing: {}",
                self.key, err
            );
        }
    }

    pub async fn notify_failed_to_configure(&self, cause: impl Display) {
        let message = cause.to_string();
        if let Err(err) = self
            .update_conditions(ConditionList::set_failed_to_configure, &message)
            .await
        {
            error!(
                "Error changing enactment {} state to failing with cause '{}': {}",
                self.key, message, err
            );
        }
    }

    pub async fn notify_success(&self) {
        if let Err(err) = self
            .update_conditions(ConditionList::set_success, SUCCESS_MESSAGE)
            .await
        {
            error!(
                "Error changing enactment {} state to available: {}",
                self.key, err
            );
        }
    }

    /// Create the enactment on first reconcile of the pair
    pub async fn initialize(&self) {
        match self.store.create(&self.key).await {
            Ok(_) => info!("Created enactment {}", self.key),
            Err(StoreError::AlreadyExists(_)) => debug!("Enactment {} already exists", self.key),
            Err(err) => error!("Failed to create enactment {}: {}", self.key, err),
        }
    }

    /// Delete the enactment once the pair no longer applies
    pub async fn remove(&self) {
        match self.store.delete(&self.key).await {
            Ok(()) => info!("Deleted enactment {}", self.key),
            Err(StoreError::NotFound(_)) => debug!("Enactment {} already gone", self.key),
            Err(err) => error!("Failed to delete enactment {}: {}", self.key, err),
        }
    }

    async fn update_conditions(
        &self,
        setter: ConditionSetter,
        message: &str,
    ) -> StoreResult<Enactment> {
        let enactment = update_with_retry(self.store.as_ref(), &self.key, self.retry, |e| {
            setter(&mut e.conditions, message, Utc::now())
        })
        .await?;

        debug!(
            "Enactment {} now {:?} at version {}",
            self.key,
            enactment.conditions.active(),
            enactment.resource_version
        );
        Ok(enactment)
    }
}
