use anyhow::Result;
use console::style;
use coral_agent::connection::McpConnector;
use coral_agent::coralizer::{CoralizeError, Coralizer};
use std::io;
use std::path::PathBuf;
use tracing::error;

/// Generate an agent file. Failures are reported, not returned.
pub async fn execute(
    name: Option<String>,
    server_url: Option<String>,
    template: Option<PathBuf>,
    output_dir: PathBuf,
) -> Result<()> {
    execute_with(name, server_url, template, output_dir, ask).await
}

fn ask(prompt: &str, placeholder: &str) -> io::Result<String> {
    cliclack::input(prompt).placeholder(placeholder).interact()
}

async fn execute_with<F>(
    name: Option<String>,
    server_url: Option<String>,
    template: Option<PathBuf>,
    output_dir: PathBuf,
    ask: F,
) -> Result<()>
where
    F: FnMut(&str, &str) -> io::Result<String>,
{
    cliclack::intro(style(" coralize ").on_cyan().black())?;

    let outcome = match details(name, server_url, ask) {
        Ok((name, server_url)) => {
            let spin = cliclack::spinner();
            spin.start("Connecting to the MCP server");
            let result = generate(&name, &server_url, template, output_dir).await;
            spin.stop("");
            result.map_err(|e| e.to_string())
        }
        Err(e) => Err(format!("no agent details given: {}", e)),
    };

    match outcome {
        Ok(path) => cliclack::outro(format!("File '{}' created successfully.", path.display()))?,
        Err(message) => {
            error!("Error coralizing the agent: {}", message);
            if let Err(e) = cliclack::outro_cancel(format!("Error coralizing the agent: {}", message)) {
                error!("Failed to report the error: {}", e);
            }
        }
    }
    Ok(())
}

/// Name and server URL, asking for whichever was not given
fn details<F>(
    name: Option<String>,
    server_url: Option<String>,
    mut ask: F,
) -> io::Result<(String, String)>
where
    F: FnMut(&str, &str) -> io::Result<String>,
{
    let name = match name {
        Some(name) => name,
        None => ask("Enter the agent name:", "GitHub")?,
    };
    let server_url = match server_url {
        Some(url) => url,
        None => ask("Enter the MCP server URL:", "http://localhost:3001/sse")?,
    };
    Ok((name.trim().to_string(), server_url.trim().to_string()))
}

async fn generate(
    name: &str,
    server_url: &str,
    template: Option<PathBuf>,
    output_dir: PathBuf,
) -> Result<PathBuf, CoralizeError> {
    let mut coralizer = Coralizer::new(McpConnector).with_output_dir(output_dir);
    if let Some(template) = template {
        coralizer = coralizer.with_template_file(&template)?;
    }
    coralizer.generate(name, server_url).await
}
