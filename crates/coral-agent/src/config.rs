//! Agent settings.
//!
//! Sources are layered: built-in defaults, then an optional TOML file, then
//! `CORAL_*` environment variables (`__` separates nested keys, for example
//! `CORAL_CONNECTION__BASE_URL`), then explicit overrides from the command line.
//! Credentials fall back to the conventional `OPENAI_API_KEY`,
//! `WORLD_NEWS_API_KEY`, `GOOGLE_API_KEY`, `SEARCH_ENGINE_ID` and `JINA_API_KEY`
//! variables.
use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{AgentQuery, ConnectionConfig, TransportKind};
use crate::driver::{Backoff, DriverConfig, RetryPolicy};
use crate::profile::{AgentProfile, Directive};
use crate::providers::configs::{OpenAiProviderConfig, OPENAI_HOST, OPENAI_MODEL};
use crate::toolbox::human::{HumanResponder, HumanToolbox};
use crate::toolbox::math::MathToolbox;
use crate::toolbox::news::{NewsToolbox, WORLD_NEWS_HOST};
use crate::toolbox::search::{SearchConfig, SearchToolbox, GOOGLE_SEARCH_HOST, JINA_READER_HOST};
use crate::toolbox::Toolbox;

mod error;

pub use error::{to_env_var, ConfigError};

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const WORLD_NEWS_API_KEY: &str = "WORLD_NEWS_API_KEY";
pub const GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";
pub const SEARCH_ENGINE_ID: &str = "SEARCH_ENGINE_ID";
pub const JINA_API_KEY: &str = "JINA_API_KEY";

pub const DEFAULT_CORAL_URL: &str =
    "http://localhost:5555/devmode/exampleApplication/privkey/session1/sse";

/// Must stay above the longest `timeoutMs` a built-in directive asks `wait_for_mentions` for
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 90;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub agent_id: String,
    pub agent_description: String,
    pub profile: AgentProfile,
    /// A tera template replacing the profile's built-in directive
    pub directive_file: Option<PathBuf>,
    /// Model turns allowed within one run step
    pub max_turns: Option<usize>,
    /// Loop iterations before the driver stops
    pub max_steps: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub base_url: String,
    pub transport: TransportKind,
    pub wait_for_agents: u32,
    pub timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CORAL_URL.to_string(),
            transport: TransportKind::Sse,
            wait_for_agents: 2,
            timeout_secs: 30,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
        }
    }
}

/// A second MCP server whose tools the agent treats as its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolServerSettings {
    pub server_url: String,
    pub transport: TransportKind,
    pub timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for ToolServerSettings {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            transport: TransportKind::Sse,
            timeout_secs: 30,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub host: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            host: OPENAI_HOST.to_string(),
            api_key: None,
            model: OPENAI_MODEL.to_string(),
            temperature: Some(0.3),
            max_tokens: Some(4096),
        }
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("host", &self.host)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Unset retries forever
    pub connect_max_attempts: Option<u32>,
    pub connect_delay_secs: u64,
    pub step_delay_secs: u64,
    pub recover_delay_secs: u64,
    /// When set, recovery delays double per consecutive failure up to this cap
    pub recover_max_delay_secs: Option<u64>,
    pub bootstrap_settle_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            connect_max_attempts: None,
            connect_delay_secs: 5,
            step_delay_secs: 1,
            recover_delay_secs: 5,
            recover_max_delay_secs: None,
            bootstrap_settle_secs: 8,
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsSettings {
    pub host: String,
    pub api_key: Option<String>,
}

impl Default for NewsSettings {
    fn default() -> Self {
        Self {
            host: WORLD_NEWS_HOST.to_string(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for NewsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewsSettings")
            .field("host", &self.host)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub google_host: String,
    pub google_api_key: Option<String>,
    pub search_engine_id: Option<String>,
    pub reader_host: String,
    pub reader_api_key: Option<String>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            google_host: GOOGLE_SEARCH_HOST.to_string(),
            google_api_key: None,
            search_engine_id: None,
            reader_host: JINA_READER_HOST.to_string(),
            reader_api_key: None,
        }
    }
}

impl std::fmt::Debug for SearchSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchSettings")
            .field("google_host", &self.google_host)
            .field("google_api_key", &self.google_api_key.as_ref().map(|_| "<redacted>"))
            .field("search_engine_id", &self.search_engine_id)
            .field("reader_host", &self.reader_host)
            .field("reader_api_key", &self.reader_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub agent: AgentSettings,
    pub connection: ConnectionSettings,
    pub tool_server: Option<ToolServerSettings>,
    pub provider: ProviderSettings,
    pub retry: RetrySettings,
    pub news: NewsSettings,
    pub search: SearchSettings,
}

/// Keep a configured value, else take a non-empty one from the environment
fn fill<F>(value: &mut Option<String>, env: &F, key: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    if !value.as_deref().is_some_and(|v| !v.is_empty()) {
        *value = env(key).filter(|v| !v.is_empty());
    }
    value.is_some()
}

impl Settings {
    /// Load from every source and validate
    pub fn load(path: Option<&Path>, overrides: &[(&str, String)]) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("CORAL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        for (key, value) in overrides {
            builder = builder.set_override(*key, value.as_str())?;
        }

        let settings: Settings = builder.build()?.try_deserialize().map_err(|err| {
            tracing::debug!("Configuration error: {:?}", &err);
            match &err {
                ::config::ConfigError::NotFound(field) => ConfigError::MissingEnvVar {
                    env_var: to_env_var(field),
                },
                _ => ConfigError::Other(err),
            }
        })?;

        settings.resolve_credentials(|key| std::env::var(key).ok())
    }

    /// Fill credentials from the environment and check everything a run needs.
    ///
    /// Nothing here touches the network.
    pub fn resolve_credentials<F>(mut self, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let missing = |key: &str| ConfigError::MissingEnvVar {
            env_var: key.to_string(),
        };

        if !fill(&mut self.provider.api_key, &env, OPENAI_API_KEY) {
            return Err(missing(OPENAI_API_KEY));
        }

        let profile = self.agent.profile;
        if profile.requires_news() && !fill(&mut self.news.api_key, &env, WORLD_NEWS_API_KEY) {
            return Err(missing(WORLD_NEWS_API_KEY));
        }
        if profile.requires_search() {
            let search = &mut self.search;
            if !fill(&mut search.google_api_key, &env, GOOGLE_API_KEY) {
                return Err(missing(GOOGLE_API_KEY));
            }
            if !fill(&mut search.search_engine_id, &env, SEARCH_ENGINE_ID) {
                return Err(missing(SEARCH_ENGINE_ID));
            }
            fill(&mut search.reader_api_key, &env, JINA_API_KEY);
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.agent_id.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "agent.agent_id must be set (or {})",
                to_env_var("agent.agent_id")
            )));
        }
        if self.connection.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("connection.base_url must be set".into()));
        }

        if self.agent.profile.requires_tool_server()
            && self
                .tool_server
                .as_ref()
                .map_or(true, |s| s.server_url.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "the {} profile needs tool_server.server_url",
                self.agent.profile
            )));
        }

        Ok(())
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            transport: self.connection.transport,
            base_url: self.connection.base_url.clone(),
            params: Some(AgentQuery {
                wait_for_agents: self.connection.wait_for_agents,
                agent_id: self.agent.agent_id.clone(),
                agent_description: self.agent.agent_description.clone(),
            }),
            timeout: Duration::from_secs(self.connection.timeout_secs),
            read_timeout: Duration::from_secs(self.connection.read_timeout_secs),
        }
    }

    pub fn tool_server_configs(&self) -> Vec<ConnectionConfig> {
        self.tool_server
            .iter()
            .filter(|s| !s.server_url.trim().is_empty())
            .map(|s| ConnectionConfig {
                transport: s.transport,
                base_url: s.server_url.clone(),
                params: None,
                timeout: Duration::from_secs(s.timeout_secs),
                read_timeout: Duration::from_secs(s.read_timeout_secs),
            })
            .collect()
    }

    pub fn driver_config(&self) -> DriverConfig {
        let retry = &self.retry;
        let recover_delay = Duration::from_secs(retry.recover_delay_secs);
        let recover_backoff = match retry.recover_max_delay_secs {
            Some(max) => Backoff::Exponential {
                initial: recover_delay,
                max: Duration::from_secs(max),
            },
            None => Backoff::Fixed(recover_delay),
        };

        DriverConfig {
            connection: self.connection_config(),
            tool_servers: self.tool_server_configs(),
            connect_retry: RetryPolicy::fixed(
                Duration::from_secs(retry.connect_delay_secs),
                retry.connect_max_attempts,
            ),
            recover_backoff,
            step_delay: Duration::from_secs(retry.step_delay_secs),
            bootstrap: self.agent.profile.bootstrap(&self.agent.agent_id),
            bootstrap_settle: Duration::from_secs(retry.bootstrap_settle_secs),
            max_iterations: self.agent.max_steps,
        }
    }

    pub fn provider_config(&self) -> OpenAiProviderConfig {
        OpenAiProviderConfig {
            host: self.provider.host.clone(),
            api_key: self.provider.api_key.clone().unwrap_or_default(),
            model: self.provider.model.clone(),
            temperature: self.provider.temperature,
            max_tokens: self.provider.max_tokens,
        }
    }

    pub fn directive(&self) -> Result<Directive, ConfigError> {
        let agent = &self.agent;
        let template = match &agent.directive_file {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                ConfigError::Invalid(format!(
                    "cannot read directive file {}: {}",
                    path.display(),
                    e
                ))
            })?,
            None => agent.profile.directive_template().to_string(),
        };
        Ok(Directive::new(
            template,
            agent.agent_id.clone(),
            agent.agent_description.clone(),
        ))
    }

    /// The in-process toolboxes the profile needs
    pub fn local_toolboxes(
        &self,
        responder: Box<dyn HumanResponder>,
    ) -> Result<Vec<Arc<dyn Toolbox>>, ConfigError> {
        let profile = self.agent.profile;
        let mut toolboxes: Vec<Arc<dyn Toolbox>> = Vec::new();
        if profile.requires_human() {
            toolboxes.push(Arc::new(HumanToolbox::new(responder)));
        }
        if profile.requires_news() {
            let news = NewsToolbox::new(
                self.news.host.clone(),
                self.news.api_key.clone().unwrap_or_default(),
            )
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            toolboxes.push(Arc::new(news));
        }
        if profile.requires_math() {
            toolboxes.push(Arc::new(MathToolbox::new()));
        }
        if profile.requires_search() {
            let search = SearchToolbox::new(SearchConfig {
                google_host: self.search.google_host.clone(),
                google_api_key: self.search.google_api_key.clone().unwrap_or_default(),
                search_engine_id: self.search.search_engine_id.clone().unwrap_or_default(),
                reader_host: self.search.reader_host.clone(),
                reader_api_key: self.search.reader_api_key.clone(),
            })
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            toolboxes.push(Arc::new(search));
        }
        Ok(toolboxes)
    }
}
