//! Toolboxes are the callables an agent can reach.
//!
//! A remote toolbox is backed by an MCP session; local toolboxes run in-process.
//! Every toolbox advertises its tools once, when it is built, and the list stays
//! fixed for the life of the session.
use async_trait::async_trait;

use crate::errors::AgentResult;
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

pub mod human;
pub mod math;
pub mod mcp;
pub mod news;
pub mod search;

/// A named group of tools an agent can call
#[async_trait]
pub trait Toolbox: Send + Sync {
    /// Get the name of the toolbox
    fn name(&self) -> &str;

    /// Get available tools
    fn tools(&self) -> &[Tool];

    /// Call a tool with the given parameters
    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>>;
}
