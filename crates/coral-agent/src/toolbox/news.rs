use async_trait::async_trait;
use indoc::{formatdoc, indoc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use super::Toolbox;
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

pub const WORLD_NEWS_HOST: &str = "https://api.worldnewsapi.com";
pub const WORLD_NEWS_TOOL: &str = "world_news_search";

/// Query parameters for `GET /search-news`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsQuery {
    pub text: String,
    pub text_match_indexes: String,
    pub source_country: String,
    pub language: String,
    pub sort: String,
    pub sort_direction: String,
    pub offset: u32,
    pub number: u32,
}

impl Default for NewsQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            text_match_indexes: "title,content".to_string(),
            source_country: "us".to_string(),
            language: "en".to_string(),
            sort: "publish-time".to_string(),
            sort_direction: "ASC".to_string(),
            offset: 0,
            number: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchNewsResponse {
    #[serde(default)]
    news: Vec<Article>,
}

#[derive(Debug, Deserialize)]
struct Article {
    title: Option<String>,
    url: Option<String>,
    publish_date: Option<String>,
    text: Option<String>,
}

impl Article {
    fn to_markdown(&self) -> String {
        let url = self.url.as_deref().unwrap_or("No URL");
        formatdoc! {"
            ### Title: {title}

            **URL:** [{url}]({url})

            **Date:** {date}

            **Text:** {text}

            ------------------
            ",
            title = self.title.as_deref().unwrap_or("No title"),
            url = url,
            date = self.publish_date.as_deref().unwrap_or("No date"),
            text = self.text.as_deref().unwrap_or("No description"),
        }
    }
}

/// Pass-through wrapper around the WorldNewsAPI article search.
///
/// Backend failures never surface as tool errors: they come back as readable
/// text so the model can relay them into the thread.
pub struct NewsToolbox {
    tools: Vec<Tool>,
    client: Client,
    host: String,
    api_key: String,
}

impl NewsToolbox {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> AgentResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AgentError::Internal(e.to_string()))?;

        let search = Tool::new(
            WORLD_NEWS_TOOL,
            indoc! {r#"
                Search articles from WorldNewsAPI.
                Returns a Markdown list of matching articles, or a message describing why none could be fetched.
            "#},
            json!({
                "type": "object",
                "required": ["text"],
                "properties": {
                    "text": {"type": "string", "description": "Search query string (keywords, phrases)"},
                    "text_match_indexes": {"type": "string", "default": "title,content", "description": "Where to search for the text"},
                    "source_country": {"type": "string", "default": "us", "description": "Country of news articles"},
                    "language": {"type": "string", "default": "en", "description": "Language of news articles"},
                    "sort": {"type": "string", "default": "publish-time", "description": "Sorting criteria"},
                    "sort_direction": {"type": "string", "default": "ASC", "description": "Sort direction"},
                    "offset": {"type": "integer", "default": 0, "description": "Number of news to skip"},
                    "number": {"type": "integer", "default": 3, "description": "Number of news to return"}
                }
            }),
        );

        Ok(Self {
            tools: vec![search],
            client,
            host: host.into(),
            api_key: api_key.into(),
        })
    }

    async fn search(&self, query: &NewsQuery) -> Result<String, String> {
        let url = format!("{}/search-news", self.host.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&[("api-key", self.api_key.as_str())])
            .query(query)
            .send()
            .await
            .map_err(|e| {
                format!(
                    "Unexpected error: {}. Please try again later.",
                    e.without_url()
                )
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "Failed to fetch news: ({}) {}. Please check the API key or try again later.",
                status, body
            ));
        }

        let parsed: SearchNewsResponse = response
            .json()
            .await
            .map_err(|e| format!("Unexpected error: {}. Please try again later.", e))?;

        if parsed.news.is_empty() {
            tracing::warn!("No articles found for query.");
            return Ok("No news articles found for the query.".to_string());
        }

        Ok(parsed
            .news
            .iter()
            .map(Article::to_markdown)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[async_trait]
impl Toolbox for NewsToolbox {
    fn name(&self) -> &str {
        "world_news"
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        if tool_call.name != WORLD_NEWS_TOOL {
            return Err(AgentError::ToolNotFound(tool_call.name));
        }

        let query: NewsQuery = serde_json::from_value(tool_call.arguments)
            .map_err(|e| AgentError::InvalidParameters(e.to_string()))?;
        if query.text.trim().is_empty() {
            return Err(AgentError::InvalidParameters(
                "Missing 'text' parameter".into(),
            ));
        }

        tracing::info!(text = %query.text, "Calling world news search");
        let text = match self.search(&query).await {
            Ok(news) => {
                tracing::info!("Successfully fetched news articles.");
                news
            }
            Err(message) => {
                tracing::error!(error = %message, "News API error");
                message
            }
        };

        Ok(vec![Content::text(text)])
    }
}
