use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::State;

/// Observed network state of a node, as reported outward
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkState {
    pub node: String,
    /// Live state with excluded interfaces filtered out
    pub current_state: State,
    pub last_successful_update_time: DateTime<Utc>,
}
