use anyhow::Result;
use coral_agent::agent::Agent;
use coral_agent::config::Settings;
use coral_agent::connection::McpConnector;
use coral_agent::driver::LoopDriver;
use coral_agent::providers::openai::OpenAiProvider;
use coral_agent::toolbox::human::{HumanResponder, StdinResponder};
use std::path::PathBuf;
use tracing::info;

use crate::prompt::human::CliclackResponder;

pub async fn execute(config: Option<PathBuf>, overrides: Vec<(&'static str, String)>) -> Result<()> {
    // Credentials are checked here, before anything touches the network
    let settings = Settings::load(config.as_deref(), &overrides)?;
    info!(
        agent_id = %settings.agent.agent_id,
        profile = %settings.agent.profile,
        "Starting agent"
    );

    let responder: Box<dyn HumanResponder> = if console::user_attended() {
        Box::new(CliclackResponder)
    } else {
        Box::new(StdinResponder::stdio())
    };

    let provider = OpenAiProvider::new(settings.provider_config())?;
    let agent = Agent::new(Box::new(provider)).with_max_turns(settings.agent.max_turns);
    let mut driver = LoopDriver::new(
        settings.driver_config(),
        McpConnector,
        Box::new(agent),
        settings.directive()?,
        settings.local_toolboxes(responder)?,
    );

    tokio::select! {
        result = driver.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }
    Ok(())
}
