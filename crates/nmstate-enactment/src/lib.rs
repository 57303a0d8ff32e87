//! Enactment status reporting
//!
//! Every (node, policy) pair owns one [`Enactment`] record. Reporters update
//! it through a compare-and-swap loop on the record's resource version so
//! that several handler replicas can report concurrently without locks.
//! Losing a race is never fatal: failures are logged and a later reconcile
//! writes the superseding status.

pub mod manager;
pub mod retry;
pub mod store;


pub use manager::ConditionManager;
pub use nmstate_shared_types::{Enactment, EnactmentKey};
pub use retry::{update_with_retry, RetryPolicy};
pub use store::{EnactmentStore, FileEnactmentStore, InMemoryEnactmentStore, StoreError};
