//! Bounded optimistic-concurrency updates

use std::time::Duration;

use log::debug;

use crate::store::{EnactmentStore, StoreError, StoreResult};
use nmstate_shared_types::{Enactment, EnactmentKey};

/// How often a conflicting status write is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub steps: u32,
    /// Fixed pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            steps: 5,
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(steps: u32, backoff: Duration) -> Self {
        Self {
            steps: steps.max(1),
            backoff,
        }
    }
}

/// Fetch, mutate and compare-and-swap an enactment, refetching on conflict.
///
/// A missing record is created first. Only conflicts are retried; any
/// other error is returned immediately. When every attempt conflicts the
/// last conflict is returned.
pub async fn update_with_retry<F>(
    store: &dyn EnactmentStore,
    key: &EnactmentKey,
    policy: RetryPolicy,
    mut mutate: F,
) -> StoreResult<Enactment>
where
    F: FnMut(&mut Enactment) + Send,
{
    let steps = policy.steps.max(1);
    let mut attempt = 1;

    loop {
        let err = match try_update(store, key, &mut mutate).await {
            Ok(enactment) => return Ok(enactment),
            Err(err) => err,
        };

        if !err.is_conflict() || attempt >= steps {
            return Err(err);
        }

        debug!(
            "Enactment {} update attempt {}/{} lost a race: {}",
            key, attempt, steps, err
        );
        attempt += 1;
        tokio::time::sleep(policy.backoff).await;
    }
}

async fn try_update<F>(
    store: &dyn EnactmentStore,
    key: &EnactmentKey,
    mutate: &mut F,
) -> StoreResult<Enactment>
where
    F: FnMut(&mut Enactment) + Send,
{
    let mut enactment = match store.get(key).await {
        Ok(enactment) => enactment,
        Err(StoreError::NotFound(_)) => store.create(key).await?,
        Err(e) => return Err(e),
    };

    mutate(&mut enactment);
    store.update(&enactment).await
}
