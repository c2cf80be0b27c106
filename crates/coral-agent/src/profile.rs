use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::models::tool::Tool;
use crate::prompt_template::{load_prompt, tools_description};
use crate::toolset::ToolSet;

/// The built-in agent roles
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AgentProfile {
    /// Talks to the user through `ask_human` and coordinates the other agents
    Interface,
    /// Answers news requests with `world_news_search`
    WorldNews,
    /// Does calculations for other agents with local arithmetic tools
    Math,
    /// Answers research requests with web search and page reading
    Search,
    /// Carries out instructions from any agent with whatever tools it has
    #[default]
    Responder,
    /// A responder whose own tools come from a second MCP server
    Coralized,
}

impl AgentProfile {
    pub fn directive_template(&self) -> &'static str {
        match self {
            AgentProfile::Interface => include_str!("prompts/interface.md"),
            AgentProfile::WorldNews => include_str!("prompts/world_news.md"),
            AgentProfile::Math => include_str!("prompts/math.md"),
            AgentProfile::Search => include_str!("prompts/search.md"),
            AgentProfile::Responder => include_str!("prompts/responder.md"),
            AgentProfile::Coralized => include_str!("prompts/coralized.md"),
        }
    }

    /// Prompts run once after connecting, before the loop starts
    pub fn bootstrap(&self, agent_id: &str) -> Vec<String> {
        match self {
            AgentProfile::Interface => vec![
                format!("Register as {}", agent_id),
                "Check in with the other agents to introduce yourself, before we start answering user queries.".to_string(),
                "Ask the user for a request to work with the other agents to fulfill by calling the ask_human tool.".to_string(),
            ],
            AgentProfile::Search => vec![format!("Register as {}", agent_id)],
            _ => Vec::new(),
        }
    }

    pub fn requires_news(&self) -> bool {
        matches!(self, AgentProfile::WorldNews)
    }

    pub fn requires_math(&self) -> bool {
        matches!(self, AgentProfile::Math)
    }

    pub fn requires_search(&self) -> bool {
        matches!(self, AgentProfile::Search)
    }

    pub fn requires_human(&self) -> bool {
        matches!(self, AgentProfile::Interface)
    }

    pub fn requires_tool_server(&self) -> bool {
        matches!(self, AgentProfile::Coralized)
    }
}

#[derive(Serialize)]
struct DirectiveContext<'a> {
    agent_id: &'a str,
    agent_description: &'a str,
    tools: Vec<Tool>,
    local_tools: Vec<Tool>,
    tools_description: String,
    local_tools_description: String,
}

/// The system text that tells the model who it is and what to do
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    template: String,
    agent_id: String,
    agent_description: String,
}

impl Directive {
    pub fn new(
        template: impl Into<String>,
        agent_id: impl Into<String>,
        agent_description: impl Into<String>,
    ) -> Self {
        Self {
            template: template.into(),
            agent_id: agent_id.into(),
            agent_description: agent_description.into(),
        }
    }

    pub fn for_profile(
        profile: AgentProfile,
        agent_id: impl Into<String>,
        agent_description: impl Into<String>,
    ) -> Self {
        Self::new(profile.directive_template(), agent_id, agent_description)
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Render the directive against the tools of a live session
    pub fn render(&self, tools: &ToolSet) -> Result<String, tera::Error> {
        let all = tools.tools();
        let local = tools.local_tools();
        let context = DirectiveContext {
            agent_id: &self.agent_id,
            agent_description: &self.agent_description,
            tools_description: tools_description(&all),
            local_tools_description: tools_description(&local),
            tools: all,
            local_tools: local,
        };
        load_prompt(&self.template, &context)
    }
}
