//! nmstate node handler apply path
//!
//! Staged transactions against nmstatectl with vlan filtering enforcement,
//! connectivity verification and automatic rollback, plus the periodic
//! observed state refresh.

pub mod enactor;
pub mod nmstatectl;
pub mod node_state;
pub mod probe;
pub mod transaction;
pub mod vlan_filtering;


pub use enactor::PolicyEnactor;
pub use nmstatectl::{NetworkTool, Nmstatectl, DEFAULT_OPERATION_TIMEOUT};
pub use node_state::NodeStateRefresher;
pub use probe::{
    poll_for, poll_immediate, ApiServerCheck, ConnectivityProbe, ControlPlaneCheck, PingCheck,
    ReachabilityCheck, DEFAULT_PROBE_INTERVAL,
};
pub use transaction::{NmstateApplier, TransactionState, EMPTY_DESIRED_STATE_MESSAGE};
pub use vlan_filtering::{VlanFilterEnforcer, VlanFilteringCommand, VlanFilteringHelper};
