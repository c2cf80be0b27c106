//! Opening sessions against MCP servers.
//!
//! The Coral server identifies an agent by query parameters on the connection
//! URL, so a [`ConnectionConfig`] carries both the transport settings and the
//! agent identity that is announced when the session opens.
use async_trait::async_trait;
use rmcp::transport::{SseClientTransport, StreamableHttpClientTransport};
use rmcp::ServiceExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::toolbox::mcp::{convert_tool, McpToolbox};
use crate::toolbox::Toolbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(strum_macros::Display, strum_macros::EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TransportKind {
    /// Server-sent events, the transport the Coral server speaks
    #[default]
    Sse,
    StreamableHttp,
}

/// Identity announced to the Coral server when the session opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentQuery {
    pub wait_for_agents: u32,
    pub agent_id: String,
    pub agent_description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub transport: TransportKind,
    pub base_url: String,
    pub params: Option<AgentQuery>,
    /// Bounds the handshake and the tool listing
    pub timeout: Duration,
    /// Bounds each tool call
    pub read_timeout: Duration,
}

impl ConnectionConfig {
    /// The full server URL, with the agent identity form-encoded into the query
    pub fn url(&self) -> Result<String, ConnectionError> {
        let Some(params) = &self.params else {
            return Ok(self.base_url.clone());
        };

        let query = serde_urlencoded::to_string(params)
            .map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        Ok(format!("{}{}{}", self.base_url, separator, query))
    }

    /// A short name for logs and toolbox naming
    pub fn label(&self) -> String {
        match &self.params {
            Some(params) => params.agent_id.clone(),
            None => url::Url::parse(&self.base_url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| self.base_url.clone()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Server unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Timed out after {0:?} connecting to the server")]
    Timeout(Duration),

    #[error("Handshake with the server failed: {0}")]
    Handshake(String),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}

/// Opens a session and returns the tools it advertises
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Toolbox>, ConnectionError>;
}

/// Connects over MCP with the rmcp client, on either transport
#[derive(Debug, Default, Clone)]
pub struct McpConnector;

#[async_trait]
impl Connector for McpConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Toolbox>, ConnectionError> {
        let url = config.url()?;
        url::Url::parse(&url).map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;

        let unreachable = |reason: String| ConnectionError::Unreachable {
            url: config.base_url.clone(),
            reason,
        };
        let session = async {
            let service = match config.transport {
                TransportKind::Sse => {
                    let transport = SseClientTransport::start(url.clone())
                        .await
                        .map_err(|e| unreachable(e.to_string()))?;
                    ().serve(transport)
                        .await
                        .map_err(|e| unreachable(e.to_string()))?
                }
                TransportKind::StreamableHttp => {
                    let transport = StreamableHttpClientTransport::from_uri(url.clone());
                    ().serve(transport)
                        .await
                        .map_err(|e| unreachable(e.to_string()))?
                }
            };
            let mcp_tools = service
                .list_all_tools()
                .await
                .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
            Ok::<_, ConnectionError>((service, mcp_tools))
        };

        let (service, mcp_tools) = tokio::time::timeout(config.timeout, session)
            .await
            .map_err(|_| ConnectionError::Timeout(config.timeout))??;

        let tools = mcp_tools.iter().map(convert_tool).collect::<Vec<_>>();
        tracing::info!(
            server = %config.base_url,
            transport = %config.transport,
            tools = tools.len(),
            "Connected to MCP server"
        );

        Ok(Arc::new(McpToolbox::new(
            config.label(),
            service,
            tools,
            config.read_timeout,
        )))
    }
}
