use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};
use crate::toolbox::Toolbox;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolSetError {
    #[error("Tool '{name}' is offered by both '{first}' and '{second}'")]
    DuplicateTool {
        name: String,
        first: String,
        second: String,
    },
}

/// The tools one agent session can call: remote tools first, then local ones.
///
/// Tool names are unique across the whole set, so a call can be routed by name
/// alone.
#[derive(Clone)]
pub struct ToolSet {
    remote: Vec<Arc<dyn Toolbox>>,
    local: Vec<Arc<dyn Toolbox>>,
    routes: HashMap<String, Arc<dyn Toolbox>>,
}

impl ToolSet {
    pub fn compose(
        remote: Vec<Arc<dyn Toolbox>>,
        local: Vec<Arc<dyn Toolbox>>,
    ) -> Result<Self, ToolSetError> {
        let mut routes: HashMap<String, Arc<dyn Toolbox>> = HashMap::new();
        for toolbox in remote.iter().chain(local.iter()) {
            for tool in toolbox.tools() {
                if let Some(existing) = routes.get(&tool.name) {
                    return Err(ToolSetError::DuplicateTool {
                        name: tool.name.clone(),
                        first: existing.name().to_string(),
                        second: toolbox.name().to_string(),
                    });
                }
                routes.insert(tool.name.clone(), Arc::clone(toolbox));
            }
        }

        Ok(Self {
            remote,
            local,
            routes,
        })
    }

    /// Every tool, remote first, each group in advertised order
    pub fn tools(&self) -> Vec<Tool> {
        let mut tools = self.remote_tools();
        tools.extend(self.local_tools());
        tools
    }

    pub fn remote_tools(&self) -> Vec<Tool> {
        Self::collect(&self.remote)
    }

    pub fn local_tools(&self) -> Vec<Tool> {
        Self::collect(&self.local)
    }

    fn collect(toolboxes: &[Arc<dyn Toolbox>]) -> Vec<Tool> {
        toolboxes
            .iter()
            .flat_map(|toolbox| toolbox.tools().iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Route a call to the toolbox that advertised the tool
    pub async fn dispatch(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        let toolbox = self
            .routes
            .get(&tool_call.name)
            .ok_or_else(|| AgentError::ToolNotFound(tool_call.name.clone()))?;
        toolbox.call(tool_call).await
    }
}
