use anyhow::Result as AnyhowResult;
use async_trait::async_trait;
use indoc::indoc;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;

use super::Toolbox;
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

pub const ASK_HUMAN_TOOL: &str = "ask_human";

/// Something that can put a question to a person and return their answer
#[async_trait]
pub trait HumanResponder: Send + Sync {
    async fn ask(&self, question: &str) -> AnyhowResult<String>;
}

/// Asks on a writer and reads one line per answer from a reader.
///
/// The reader is kept between questions so input typed ahead is not dropped.
pub struct LineResponder<R, W> {
    io: Mutex<(R, W)>,
}

/// Asks on stdout and reads from stdin
pub type StdinResponder = LineResponder<BufReader<Stdin>, Stdout>;

impl StdinResponder {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl Default for StdinResponder {
    fn default() -> Self {
        Self::stdio()
    }
}

impl<R, W> LineResponder<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }
}

#[async_trait]
impl<R, W> HumanResponder for LineResponder<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn ask(&self, question: &str) -> AnyhowResult<String> {
        let mut io = self.io.lock().await;
        let (reader, writer) = &mut *io;
        writer
            .write_all(format!("Agent asks: {}\nYour response: ", question).as_bytes())
            .await?;
        writer.flush().await?;

        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            anyhow::bail!("input closed before an answer was given");
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Local toolbox exposing the `ask_human` tool
pub struct HumanToolbox {
    tools: Vec<Tool>,
    responder: Box<dyn HumanResponder>,
}

impl HumanToolbox {
    pub fn new(responder: Box<dyn HumanResponder>) -> Self {
        let ask_human = Tool::new(
            ASK_HUMAN_TOOL,
            indoc! {r#"
                Ask the user a question and wait for a response.
            "#}
            .trim(),
            json!({
                "type": "object",
                "required": ["question"],
                "properties": {
                    "question": {"type": "string"}
                }
            }),
        );

        Self {
            tools: vec![ask_human],
            responder,
        }
    }
}

#[async_trait]
impl Toolbox for HumanToolbox {
    fn name(&self) -> &str {
        "human"
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        if tool_call.name != ASK_HUMAN_TOOL {
            return Err(AgentError::ToolNotFound(tool_call.name));
        }

        let question = tool_call
            .arguments
            .get("question")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::InvalidParameters("Missing 'question' parameter".into()))?;

        tracing::info!(question, "asking the user");
        let answer = self
            .responder
            .ask(question)
            .await
            .map_err(|e| AgentError::ExecutionError(e.to_string()))?;

        Ok(vec![Content::text(answer)])
    }
}
