//! nmstate node handler CLI (nmstate-handler)

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use nmstate_cli::commands::{ApplyCommand, ForgetCommand, OutputFormat, ShowCommand, StatusCommand};
use nmstate_cli::{resolve_node, HandlerContext, DEFAULT_STORE_DIR};

#[derive(Parser)]
#[command(name = "nmstate-handler")]
#[command(about = "Staged nmstate network configuration for a single node")]
#[command(version)]
#[command(long_about = "
Staged nmstate network configuration for a single node

Desired states are staged as an nmstate checkpoint, verified against the
default gateway and the control plane, then committed or rolled back. The
outcome is recorded as an enactment per (node, policy).

Examples:
  nmstate-handler apply -f bridge.yaml -p bridge-policy   # Apply a policy
  nmstate-handler show                                     # Reported node state
  nmstate-handler show --unfiltered -o json                # Full live state
  nmstate-handler status                                   # All enactments
  nmstate-handler forget -p bridge-policy                  # Drop an enactment
")]
struct Cli {
    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (defaults to $CONFIG_PATH or /etc/nmstate/nmstate.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding enactment records
    #[arg(long, global = true, default_value = DEFAULT_STORE_DIR)]
    store_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a desired state and record the enactment
    Apply {
        /// Desired state document (YAML or JSON)
        #[arg(short = 'f', long)]
        desired: PathBuf,

        /// Policy the desired state belongs to
        #[arg(short, long)]
        policy: String,

        /// Node name (defaults to $NODE_NAME)
        #[arg(short, long)]
        node: Option<String>,
    },

    /// Show the observed node state
    Show {
        /// Node name (defaults to $NODE_NAME)
        #[arg(short, long)]
        node: Option<String>,

        /// Do not filter out excluded interfaces
        #[arg(long)]
        unfiltered: bool,

        /// Output format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        output: OutputFormat,
    },

    /// List recorded enactments
    Status {
        /// Only enactments of this node
        #[arg(short, long)]
        node: Option<String>,

        /// Only enactments of this policy
        #[arg(short, long)]
        policy: Option<String>,

        /// Output format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        output: OutputFormat,
    },

    /// Delete the enactment of a policy that no longer applies
    Forget {
        /// Policy to forget
        #[arg(short, long)]
        policy: String,

        /// Node name (defaults to $NODE_NAME)
        #[arg(short, long)]
        node: Option<String>,
    },
}

async fn run(cli: Cli) -> Result<Option<String>> {
    let context = HandlerContext::bootstrap(cli.config.as_deref(), &cli.store_dir).await?;

    match cli.command {
        Commands::Apply {
            desired,
            policy,
            node,
        } => {
            let node = resolve_node(node)?;
            let output = ApplyCommand::new(context)
                .execute(&desired, &node, &policy)
                .await?;
            Ok(Some(output))
        }

        Commands::Show {
            node,
            unfiltered,
            output,
        } => {
            let node = resolve_node(node)?;
            let rendered = ShowCommand::new(context)
                .execute(&node, unfiltered, output)
                .await?;
            Ok(Some(rendered))
        }

        Commands::Status {
            node,
            policy,
            output,
        } => {
            let rendered = StatusCommand::new(context)
                .execute(node.as_deref(), policy.as_deref(), output)
                .await?;
            Ok(Some(rendered))
        }

        Commands::Forget { policy, node } => {
            let node = resolve_node(node)?;
            ForgetCommand::new(context).execute(&node, &policy).await;
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let quiet = cli.quiet;

    match run(cli).await {
        Ok(output) => {
            if let Some(output) = output {
                println!("{}", output.trim_end());
            }
            log::debug!("Command completed successfully");
            std::process::exit(0);
        }
        Err(e) => {
            if !quiet {
                eprintln!("Error: {}", e);
                for cause in e.chain().skip(1) {
                    eprintln!("  Caused by: {}", cause);
                }
            }
            std::process::exit(1);
        }
    }
}
