//! Status command

use std::sync::Arc;

use anyhow::{Context, Result};

use nmstate_shared_types::Enactment;

use super::OutputFormat;
use crate::context::HandlerContext;

/// List recorded enactments, optionally narrowed to a node or policy
pub struct StatusCommand {
    context: Arc<HandlerContext>,
}

impl StatusCommand {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    pub async fn execute(
        &self,
        node: Option<&str>,
        policy: Option<&str>,
        format: OutputFormat,
    ) -> Result<String> {
        let mut enactments: Vec<Enactment> = self
            .context
            .store
            .list()
            .await
            .context("Failed to list enactments")?
            .into_iter()
            .filter(|e| node.map_or(true, |node| e.key.node == node))
            .filter(|e| policy.map_or(true, |policy| e.key.policy == policy))
            .collect();
        enactments.sort_by(|a, b| a.key.cmp(&b.key));

        render_enactments(&enactments, format)
    }
}

pub fn render_enactments(enactments: &[Enactment], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(enactments)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(enactments)?),
        OutputFormat::Text => {
            let mut out = format!(
                "{:<15} {:<25} {:<12} {:<25} {}\n",
                "Node", "Policy", "Status", "Reason", "Message"
            );
            out.push_str(&"-".repeat(100));
            out.push('\n');

            for enactment in enactments {
                let active = enactment.conditions.active();
                let condition = active.and_then(|t| enactment.conditions.find(t));
                out.push_str(&format!(
                    "{:<15} {:<25} {:<12} {:<25} {}\n",
                    enactment.key.node,
                    enactment.key.policy,
                    active.map(|t| t.as_str()).unwrap_or("Unknown"),
                    condition
                        .and_then(|c| c.reason)
                        .map(|r| r.as_str())
                        .unwrap_or("-"),
                    condition.map(|c| c.message.as_str()).unwrap_or("")
                ));
            }
            Ok(out)
        }
    }
}
