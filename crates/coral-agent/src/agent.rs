use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::message::{Message, ToolRequest};
use crate::models::tool::ToolCall;
use crate::providers::base::Provider;
use crate::toolset::ToolSet;

/// What a single run step produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    /// Text of the final assistant message
    pub reply: String,
    /// Number of tool calls made along the way
    pub tool_calls: usize,
}

/// Runs one LLM-driven step: a directive and a tool set in, one reply out.
///
/// The executor may call any number of tools before it returns. Scratch state
/// lives only for the duration of the call.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run_step(
        &self,
        directive: &str,
        input: Option<&str>,
        tools: &ToolSet,
    ) -> Result<StepOutcome>;
}

/// Agent integrates a foundational LLM with the tools it can call
pub struct Agent {
    provider: Box<dyn Provider>,
    max_turns: Option<usize>,
}

impl Agent {
    /// Create a new Agent with the specified provider
    pub fn new(provider: Box<dyn Provider>) -> Self {
        Self {
            provider,
            max_turns: None,
        }
    }

    /// Stop after this many model turns even if the model keeps calling tools
    pub fn with_max_turns(mut self, max_turns: Option<usize>) -> Self {
        self.max_turns = max_turns;
        self
    }

    async fn dispatch_tool_call(
        tools: &ToolSet,
        tool_call: AgentResult<ToolCall>,
    ) -> AgentResult<Vec<Content>> {
        let call = tool_call?;
        tracing::debug!(tool = %call.name, "dispatching tool call");
        tools.dispatch(call).await
    }

    /// Create a stream that yields each message as it's generated by the agent.
    /// This includes both the assistant's responses and any tool responses.
    pub fn reply<'a>(
        &'a self,
        directive: &'a str,
        messages: &[Message],
        tools: &'a ToolSet,
    ) -> BoxStream<'a, Result<Message>> {
        let mut messages = messages.to_vec();
        let tool_descriptors = tools.tools();

        Box::pin(async_stream::try_stream! {
            let mut turns = 0;
            loop {
                let (response, _) = self.provider.complete(
                    directive,
                    &messages,
                    &tool_descriptors,
                ).await?;
                turns += 1;

                yield response.clone();

                // Ensures the message above is yielded before the tool calls start
                tokio::task::yield_now().await;

                let tool_requests: Vec<&ToolRequest> = response.tool_requests();
                if tool_requests.is_empty() {
                    break;
                }

                // Dispatch each in parallel but wait until all are finished
                let futures: Vec<_> = tool_requests
                    .iter()
                    .map(|request| Self::dispatch_tool_call(tools, request.tool_call.clone()))
                    .collect();
                let outputs = futures::future::join_all(futures).await;

                let mut message_tool_response = Message::user();
                let mut lost = None;
                for (request, output) in tool_requests.iter().zip(outputs.into_iter()) {
                    if let Err(AgentError::Connection(reason)) = &output {
                        lost = Some(reason.clone());
                    }
                    message_tool_response = message_tool_response.with_tool_response(
                        request.id.clone(),
                        output,
                    );
                }

                yield message_tool_response.clone();

                if let Some(reason) = lost {
                    Err::<(), _>(AgentError::Connection(reason))?;
                }

                if self.max_turns.is_some_and(|max| turns >= max) {
                    tracing::warn!(turns, "turn limit reached, ending the step");
                    break;
                }

                messages.push(response);
                messages.push(message_tool_response);
            }
        })
    }
}

#[async_trait]
impl Executor for Agent {
    async fn run_step(
        &self,
        directive: &str,
        input: Option<&str>,
        tools: &ToolSet,
    ) -> Result<StepOutcome> {
        let messages: Vec<Message> = input
            .map(|text| vec![Message::user().with_text(text)])
            .unwrap_or_default();

        let mut stream = self.reply(directive, &messages, tools);
        let mut outcome = StepOutcome::default();
        while let Some(message) = stream.try_next().await? {
            outcome.tool_calls += message.tool_requests().len();
            let text = message.text();
            if !text.is_empty() {
                outcome.reply = text;
            }
        }
        Ok(outcome)
    }
}
