use async_trait::async_trait;
use indoc::{formatdoc, indoc};
use regex::Regex;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::Toolbox;
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

pub const GOOGLE_SEARCH_HOST: &str = "https://www.googleapis.com";
pub const JINA_READER_HOST: &str = "https://r.jina.ai";

pub const SEARCH_GOOGLE_TOOL: &str = "search_google";
pub const URL_CONTENT_TOOL: &str = "get_url_content";
pub const URL_CONTEXT_TOOL: &str = "get_url_content_with_context";

/// Credentials and endpoints for the search tools
#[derive(Clone)]
pub struct SearchConfig {
    pub google_host: String,
    pub google_api_key: String,
    pub search_engine_id: String,
    pub reader_host: String,
    /// The reader works without a key, at a lower rate limit
    pub reader_api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default = "default_results")]
    num_results: u32,
}

fn default_results() -> u32 {
    5
}

#[derive(Debug, Deserialize)]
struct UrlArgs {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ContextArgs {
    url: String,
    search_string: String,
    #[serde(default = "default_context")]
    context_chars: usize,
}

fn default_context() -> usize {
    700
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    title: Option<String>,
    link: Option<String>,
    snippet: Option<String>,
}

impl SearchItem {
    fn to_markdown(&self, rank: usize) -> String {
        formatdoc! {"
            ### {rank}. {title}

            **URL:** {url}

            **Description:** {snippet}
            ",
            rank = rank,
            title = self.title.as_deref().unwrap_or("No title"),
            url = self.link.as_deref().unwrap_or("No URL"),
            snippet = self.snippet.as_deref().unwrap_or("No description").trim(),
        }
    }
}

/// The `context_chars` characters either side of the first case-insensitive match
fn context_around(content: &str, needle: &str, context_chars: usize) -> Option<String> {
    let pattern = Regex::new(&format!("(?i){}", regex::escape(needle))).ok()?;
    let found = pattern.find(content)?;
    let start = content[..found.start()]
        .char_indices()
        .rev()
        .take(context_chars)
        .last()
        .map_or(found.start(), |(i, _)| i);
    let end = content[found.end()..]
        .char_indices()
        .nth(context_chars)
        .map_or(content.len(), |(i, _)| found.end() + i);
    Some(content[start..end].to_string())
}

/// Web search and page reading for the search agent.
///
/// Like the news tools, backend failures come back as text for the model to relay.
pub struct SearchToolbox {
    tools: Vec<Tool>,
    client: Client,
    config: SearchConfig,
}

impl SearchToolbox {
    pub fn new(config: SearchConfig) -> AgentResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AgentError::Internal(e.to_string()))?;

        let search = Tool::new(
            SEARCH_GOOGLE_TOOL,
            indoc! {r#"
                Search the web with Google.
                Returns a Markdown list of results with title, URL and description.
            "#},
            json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {"type": "string", "description": "The search query"},
                    "num_results": {"type": "integer", "default": 5, "minimum": 1, "maximum": 10, "description": "Number of results to return"}
                }
            }),
        );
        let content = Tool::new(
            URL_CONTENT_TOOL,
            "Read a web page and return its content as text.",
            json!({
                "type": "object",
                "required": ["url"],
                "properties": {
                    "url": {"type": "string", "description": "The page to read"}
                }
            }),
        );
        let context = Tool::new(
            URL_CONTEXT_TOOL,
            indoc! {r#"
                Read a web page and return only the text around the first match of a search string.
                Use it to pull one fact out of a long page.
            "#},
            json!({
                "type": "object",
                "required": ["url", "search_string"],
                "properties": {
                    "url": {"type": "string", "description": "The page to read"},
                    "search_string": {"type": "string", "description": "Text to look for, case-insensitive"},
                    "context_chars": {"type": "integer", "default": 700, "description": "Characters to keep on each side of the match"}
                }
            }),
        );

        Ok(Self {
            tools: vec![search, content, context],
            client,
            config,
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, String> {
        let response = request.send().await.map_err(|e| {
            format!(
                "Unexpected error: {}. Please try again later.",
                e.without_url()
            )
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Unexpected error: {}. Please try again later.", e))?;
        if status != StatusCode::OK {
            return Err(format!("Request failed: ({}) {}", status, body));
        }
        Ok(body)
    }

    async fn search(&self, args: &SearchArgs) -> Result<String, String> {
        let url = format!(
            "{}/customsearch/v1",
            self.config.google_host.trim_end_matches('/')
        );
        let num = args.num_results.clamp(1, 10).to_string();
        let request = self.client.get(&url).query(&[
            ("key", self.config.google_api_key.as_str()),
            ("cx", self.config.search_engine_id.as_str()),
            ("q", args.query.as_str()),
            ("start", "1"),
            ("lr", "lang_en"),
            ("num", num.as_str()),
        ]);
        let body = self.send(request).await?;

        let parsed: SearchResponse = serde_json::from_str(&body)
            .map_err(|e| format!("Unexpected search response: {}", e))?;
        if parsed.items.is_empty() {
            return Ok("No search results found.".to_string());
        }
        Ok(parsed
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| item.to_markdown(i + 1))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn read(&self, page: &str) -> Result<String, String> {
        url::Url::parse(page).map_err(|e| format!("Invalid URL '{}': {}", page, e))?;
        let url = format!("{}/{}", self.config.reader_host.trim_end_matches('/'), page);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.config.reader_api_key {
            request = request.bearer_auth(key);
        }
        self.send(request).await
    }

    async fn dispatch(&self, tool_call: ToolCall) -> AgentResult<Result<String, String>> {
        let invalid = |e: serde_json::Error| AgentError::InvalidParameters(e.to_string());
        match tool_call.name.as_str() {
            SEARCH_GOOGLE_TOOL => {
                let args: SearchArgs = serde_json::from_value(tool_call.arguments).map_err(invalid)?;
                if args.query.trim().is_empty() {
                    return Err(AgentError::InvalidParameters("Missing 'query' parameter".into()));
                }
                tracing::info!(query = %args.query, "Calling web search");
                Ok(self.search(&args).await)
            }
            URL_CONTENT_TOOL => {
                let args: UrlArgs = serde_json::from_value(tool_call.arguments).map_err(invalid)?;
                tracing::info!(url = %args.url, "Reading page");
                Ok(self.read(&args.url).await)
            }
            URL_CONTEXT_TOOL => {
                let args: ContextArgs =
                    serde_json::from_value(tool_call.arguments).map_err(invalid)?;
                if args.search_string.is_empty() {
                    return Err(AgentError::InvalidParameters(
                        "Missing 'search_string' parameter".into(),
                    ));
                }
                tracing::info!(url = %args.url, search = %args.search_string, "Reading page around a match");
                Ok(self.read(&args.url).await.map(|page| {
                    context_around(&page, &args.search_string, args.context_chars).unwrap_or_else(
                        || format!("'{}' was not found on the page.", args.search_string),
                    )
                }))
            }
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}

#[async_trait]
impl Toolbox for SearchToolbox {
    fn name(&self) -> &str {
        "search"
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        let text = match self.dispatch(tool_call).await? {
            Ok(text) => text,
            Err(message) => {
                tracing::error!(error = %message, "Search backend error");
                message
            }
        };
        Ok(vec![Content::text(text)])
    }
}
