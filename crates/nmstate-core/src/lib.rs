//! nmstate node handler core
//!
//! Error taxonomy, the narrow typed view over state documents and the
//! interface filter applied before observed state is reported.

pub mod error;
pub mod filter;
pub mod state;

pub use error::{
    ApplyError, CommandError, PatternError, RollbackOutcome, StateError, VlanFilteringError,
};
pub use filter::{filter_out, InterfaceFilter};
pub use nmstate_shared_types::State;
pub use state::{InterfaceView, StateView};
