//! Forget command

use std::sync::Arc;

use crate::context::HandlerContext;

/// Drop the enactment of a policy that no longer applies to this node
pub struct ForgetCommand {
    context: Arc<HandlerContext>,
}

impl ForgetCommand {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    pub async fn execute(&self, node: &str, policy: &str) {
        self.context.condition_manager(node, policy).remove().await;
    }
}
