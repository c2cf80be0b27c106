//! Generates agent definitions that bring an existing MCP server into a Coral session.
//!
//! The generator connects to the server once to learn what it offers, then fills
//! the agent id, server URL and description into a template and writes the result
//! as `<name>_coral_agent.toml`. The generated file runs with the `coralized` profile.
//! The server is reached over the transport the template's `[tool_server]` names.
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::connection::{ConnectionConfig, ConnectionError, Connector, TransportKind};
use crate::models::tool::Tool;

pub const DEFAULT_TEMPLATE: &str = include_str!("templates/agent.toml");
pub const DEFAULT_OUTPUT_DIR: &str = "coralized_agents";

const AGENT_ID_PLACEHOLDER: &str = "agent_id = \"\"";
const SERVER_URL_PLACEHOLDER: &str = "server_url = ''";
const DESCRIPTION_PLACEHOLDER: &str = "agent_description = \"\"";

#[derive(Error, Debug)]
pub enum CoralizeError {
    #[error("Invalid agent name '{0}': use letters, digits, '_' or '-'")]
    InvalidName(String),

    #[error("Unable to connect with the MCP server: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Template is missing the placeholder `{0}`")]
    MissingPlaceholder(&'static str),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct Coralizer<C: Connector> {
    connector: C,
    template: String,
    output_dir: PathBuf,
    timeout: Duration,
    read_timeout: Duration,
}

impl<C: Connector> Coralizer<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            template: DEFAULT_TEMPLATE.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn with_template_file(self, path: &Path) -> Result<Self, CoralizeError> {
        let template = std::fs::read_to_string(path).map_err(|source| CoralizeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.with_template(template))
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connect to the server, describe it, and write the agent file.
    ///
    /// Returns the path of the written file.
    pub async fn generate(&self, agent_name: &str, server_url: &str) -> Result<PathBuf, CoralizeError> {
        validate_name(agent_name)?;

        let config = ConnectionConfig {
            transport: tool_server_transport(&self.template)?,
            base_url: server_url.to_string(),
            params: None,
            timeout: self.timeout,
            read_timeout: self.read_timeout,
        };
        let toolbox = self.connector.connect(&config).await?;
        info!(server = %server_url, tools = toolbox.tools().len(), "Connected to MCP server");

        let description = describe(agent_name, toolbox.tools());
        let contents = render(&self.template, agent_name, server_url, &description)?;

        std::fs::create_dir_all(&self.output_dir).map_err(|source| CoralizeError::Io {
            path: self.output_dir.clone(),
            source,
        })?;
        let path = self.output_dir.join(file_name(agent_name));
        std::fs::write(&path, contents).map_err(|source| CoralizeError::Io {
            path: path.clone(),
            source,
        })?;

        info!("File '{}' created successfully.", path.display());
        Ok(path)
    }
}

/// `<name>_coral_agent.toml`, lowercased
pub fn file_name(agent_name: &str) -> String {
    format!("{}_coral_agent.toml", agent_name.to_lowercase())
}

pub fn describe(agent_name: &str, tools: &[Tool]) -> String {
    if tools.is_empty() {
        return format!("{} agent exposing no tools", agent_name);
    }
    let names = tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>();
    format!("{} agent exposing tools: {}", agent_name, names.join(", "))
}

/// Substitute the three placeholders. Every placeholder must be present.
pub fn render(
    template: &str,
    agent_id: &str,
    server_url: &str,
    description: &str,
) -> Result<String, CoralizeError> {
    let substitutions = [
        (AGENT_ID_PLACEHOLDER, "agent_id", agent_id),
        (SERVER_URL_PLACEHOLDER, "server_url", server_url),
        (DESCRIPTION_PLACEHOLDER, "agent_description", description),
    ];

    let mut rendered = template.to_string();
    for (placeholder, key, value) in substitutions {
        if !rendered.contains(placeholder) {
            return Err(CoralizeError::MissingPlaceholder(placeholder));
        }
        let replacement = format!("{} = {}", key, toml_string(value));
        rendered = rendered.replacen(placeholder, &replacement, 1);
    }
    Ok(rendered)
}

fn toml_string(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

/// The transport named by the template's `[tool_server]` table, sse when absent
pub fn tool_server_transport(template: &str) -> Result<TransportKind, CoralizeError> {
    let table: toml::Table =
        toml::from_str(template).map_err(|e| CoralizeError::InvalidTemplate(e.to_string()))?;
    match table.get("tool_server").and_then(|server| server.get("transport")) {
        None => Ok(TransportKind::default()),
        Some(toml::Value::String(name)) => name.parse().map_err(|_| {
            CoralizeError::InvalidTemplate(format!("unknown tool_server.transport '{}'", name))
        }),
        Some(other) => Err(CoralizeError::InvalidTemplate(format!(
            "tool_server.transport must be a string, got {}",
            other
        ))),
    }
}

fn validate_name(agent_name: &str) -> Result<(), CoralizeError> {
    let valid = !agent_name.is_empty()
        && agent_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(CoralizeError::InvalidName(agent_name.to_string()))
    }
}
