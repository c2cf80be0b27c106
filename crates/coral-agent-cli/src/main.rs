use anyhow::Result;
use clap::{Parser, Subcommand};
use coral_agent::coralizer::DEFAULT_OUTPUT_DIR;
use coral_agent::profile::AgentProfile;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod prompt;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an agent against a Coral server until interrupted
    Run {
        /// Agent definition file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Built-in role: interface, world-news, math, search, responder or coralized
        #[arg(short, long)]
        profile: Option<AgentProfile>,

        /// Identity announced to the Coral server
        #[arg(long)]
        agent_id: Option<String>,

        /// Stop after this many loop iterations
        #[arg(long)]
        max_steps: Option<u64>,
    },

    /// Generate an agent definition for an existing MCP server
    Coralize {
        /// Agent name, prompted for when missing
        #[arg(short, long)]
        name: Option<String>,

        /// MCP server URL, prompted for when missing
        #[arg(short, long)]
        server_url: Option<String>,

        /// Template to use instead of the built-in one
        #[arg(long)]
        template: Option<PathBuf>,

        #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
        output_dir: PathBuf,
    },

    /// Print the version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            profile,
            agent_id,
            max_steps,
        } => {
            let mut overrides = Vec::new();
            if let Some(profile) = profile {
                overrides.push(("agent.profile", profile.to_string()));
            }
            if let Some(agent_id) = agent_id {
                overrides.push(("agent.agent_id", agent_id));
            }
            if let Some(max_steps) = max_steps {
                overrides.push(("agent.max_steps", max_steps.to_string()));
            }
            commands::run::execute(config, overrides).await
        }
        Command::Coralize {
            name,
            server_url,
            template,
            output_dir,
        } => commands::coralize::execute(name, server_url, template, output_dir).await,
        Command::Version => commands::version::execute(),
    }
}
