use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, RawContent};
use rmcp::service::{RoleClient, RunningService, ServiceError};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use super::Toolbox;
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

/// Tools advertised by a connected MCP server.
///
/// The tool list is fetched once at connect time. Every call is bounded by the
/// connection's read timeout.
pub struct McpToolbox {
    name: String,
    service: RunningService<RoleClient, ()>,
    tools: Vec<Tool>,
    read_timeout: Duration,
}

impl McpToolbox {
    pub fn new(
        name: impl Into<String>,
        service: RunningService<RoleClient, ()>,
        tools: Vec<Tool>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            service,
            tools,
            read_timeout,
        }
    }
}

/// Convert an rmcp tool definition into a tool descriptor
pub fn convert_tool(mcp_tool: &rmcp::model::Tool) -> Tool {
    Tool::new(
        mcp_tool.name.as_ref(),
        mcp_tool
            .description
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default(),
        Value::Object(mcp_tool.input_schema.as_ref().clone()),
    )
}

/// Protocol-level errors are the tool's answer; anything else means the session is gone
pub fn map_service_error(error: ServiceError) -> AgentError {
    match error {
        ServiceError::McpError(e) => AgentError::ExecutionError(e.message.to_string()),
        other => AgentError::Connection(other.to_string()),
    }
}

/// Bound one tool call by the read timeout.
///
/// An overrun is reported as the tool's answer; only a failed transport means the session is gone.
pub async fn within_read_timeout<T, F>(read_timeout: Duration, tool: &str, call: F) -> AgentResult<T>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(read_timeout, call).await {
        Ok(result) => result.map_err(map_service_error),
        Err(_) => Err(AgentError::ExecutionError(format!(
            "{} did not answer within {:?}",
            tool, read_timeout
        ))),
    }
}

fn extract_text(content: &[rmcp::model::Content]) -> Vec<Content> {
    content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(Content::text(t.text.as_str())),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl Toolbox for McpToolbox {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        if !self.tools.iter().any(|t| t.name == tool_call.name) {
            return Err(AgentError::ToolNotFound(tool_call.name));
        }

        let arguments = match tool_call.arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(AgentError::InvalidParameters(format!(
                    "Expected an object of arguments, got {}",
                    other
                )))
            }
        };

        let params = CallToolRequestParam {
            name: tool_call.name.clone().into(),
            arguments,
        };

        let result = within_read_timeout(
            self.read_timeout,
            &tool_call.name,
            self.service.call_tool(params),
        )
        .await?;

        let content = extract_text(&result.content);
        if result.is_error == Some(true) {
            return Err(AgentError::ExecutionError(
                crate::models::content::joined_text(&content),
            ));
        }
        Ok(content)
    }
}
