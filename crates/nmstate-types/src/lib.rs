pub mod enactment;
pub mod error;
pub mod node;
pub mod state;

pub use enactment::{
    Condition, ConditionList, ConditionReason, ConditionType, Enactment, EnactmentKey,
};
pub use error::SharedTypeError;
pub use node::NodeNetworkState;
pub use state::State;
