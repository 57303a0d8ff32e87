//! CLI commands

pub mod apply;
pub mod forget;
pub mod show;
pub mod status;

pub use apply::ApplyCommand;
pub use forget::ForgetCommand;
pub use show::ShowCommand;
pub use status::StatusCommand;

use anyhow::{bail, Result};

/// Output format shared by the read-only commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            other => bail!("Unknown output format '{}', expected text, json or yaml", other),
        }
    }
}
