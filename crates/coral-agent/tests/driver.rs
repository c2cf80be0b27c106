use anyhow::Result;
use async_trait::async_trait;
use coral_agent::agent::Agent;
use coral_agent::connection::{ConnectionConfig, ConnectionError, Connector, TransportKind};
use coral_agent::driver::{DriverConfig, DriverError, DriverState, LoopDriver, Sleeper};
use coral_agent::errors::{AgentError, AgentResult};
use coral_agent::models::content::Content;
use coral_agent::models::message::Message;
use coral_agent::models::tool::{Tool, ToolCall};
use coral_agent::profile::{AgentProfile, Directive};
use coral_agent::providers::base::{Provider, Usage};
use coral_agent::toolbox::Toolbox;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Plays back assistant messages and records the directive and history of each completion
#[derive(Clone, Default)]
struct ScriptedProvider {
    responses: Arc<Mutex<VecDeque<Message>>>,
    seen: Arc<Mutex<Vec<(String, Vec<Message>, Vec<String>)>>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        self.seen.lock().unwrap().push((
            system.to_string(),
            messages.to_vec(),
            tools.iter().map(|t| t.name.clone()).collect(),
        ));
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Message::assistant().with_text("idle"));
        Ok((next, Usage::default()))
    }
}

/// A Coral session: `wait_for_mentions` hands out queued mentions, `send_message` records replies
struct CoralSession {
    tools: Vec<Tool>,
    mentions: Mutex<VecDeque<AgentResult<String>>>,
    sent: Arc<Mutex<Vec<serde_json::Value>>>,
}

#[async_trait]
impl Toolbox for CoralSession {
    fn name(&self) -> &str {
        "coral"
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        match tool_call.name.as_str() {
            "wait_for_mentions" => {
                let next = self.mentions.lock().unwrap().pop_front();
                match next {
                    Some(mention) => Ok(vec![Content::text(mention?)]),
                    None => Ok(vec![Content::text("No new messages")]),
                }
            }
            "send_message" => {
                self.sent.lock().unwrap().push(tool_call.arguments);
                Ok(vec![Content::text("Message sent")])
            }
            other => Err(AgentError::ToolNotFound(other.to_string())),
        }
    }
}

struct FakeCoral {
    sessions: Mutex<VecDeque<Vec<AgentResult<String>>>>,
    sent: Arc<Mutex<Vec<serde_json::Value>>>,
    connects: Arc<Mutex<Vec<String>>>,
}

impl FakeCoral {
    fn new(sessions: Vec<Vec<AgentResult<String>>>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            sent: Arc::new(Mutex::new(Vec::new())),
            connects: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Connector for FakeCoral {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Toolbox>, ConnectionError> {
        self.connects.lock().unwrap().push(config.url()?);
        let mentions = self.sessions.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Arc::new(CoralSession {
            tools: vec![
                Tool::new("wait_for_mentions", "Wait for mentions", json!({"type": "object"})),
                Tool::new("send_message", "Send a message", json!({"type": "object"})),
            ],
            mentions: Mutex::new(mentions.into()),
            sent: self.sent.clone(),
        }))
    }
}

#[derive(Clone, Default)]
struct NoSleep {
    slept: Arc<Mutex<Vec<Duration>>>,
}

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

fn call(id: &str, name: &str, arguments: serde_json::Value) -> Message {
    Message::assistant().with_tool_request(id, Ok(ToolCall::new(name, arguments)))
}

fn driver_config(max_iterations: u64) -> DriverConfig {
    let mut config = DriverConfig::new(ConnectionConfig {
        transport: TransportKind::Sse,
        base_url: "http://localhost:5555/devmode/exampleApplication/privkey/session1/sse".into(),
        params: Some(coral_agent::connection::AgentQuery {
            wait_for_agents: 2,
            agent_id: "world_news_agent".into(),
            agent_description: "Fetches news".into(),
        }),
        timeout: Duration::from_secs(30),
        read_timeout: Duration::from_secs(60),
    });
    config.max_iterations = Some(max_iterations);
    config
}

#[tokio::test]
async fn test_agent_answers_a_mention_through_coral() {
    let provider = ScriptedProvider::new(vec![
        call("1", "wait_for_mentions", json!({"timeoutMs": 8000})),
        call(
            "2",
            "send_message",
            json!({"threadId": "t1", "content": "Here is the news", "mentions": ["user_interaction_agent"]}),
        ),
        Message::assistant().with_text("Replied to user_interaction_agent"),
    ]);
    let coral = FakeCoral::new(vec![vec![Ok(
        "threadId: t1, sender: user_interaction_agent, content: news about solar power".into(),
    )]]);
    let sent = coral.sent.clone();
    let connects = coral.connects.clone();
    let sleeper = NoSleep::default();

    let mut driver = LoopDriver::new(
        driver_config(1),
        coral,
        Box::new(Agent::new(Box::new(provider.clone()))),
        Directive::for_profile(AgentProfile::WorldNews, "world_news_agent", "Fetches news"),
        vec![],
    )
    .with_sleeper(sleeper.clone());

    driver.run().await.unwrap();

    assert_eq!(driver.state(), DriverState::Stopped);
    assert_eq!(driver.iterations(), 1);
    assert_eq!(driver.failures(), 0);

    assert_eq!(
        connects.lock().unwrap().as_slice(),
        ["http://localhost:5555/devmode/exampleApplication/privkey/session1/sse?waitForAgents=2&agentId=world_news_agent&agentDescription=Fetches+news"]
    );
    assert_eq!(sent.lock().unwrap()[0]["threadId"], "t1");

    let seen = provider.seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    let (directive, first_history, tool_names) = &seen[0];
    assert!(directive.contains("world_news_agent"));
    assert!(directive.contains("Tool: wait_for_mentions, Schema:"));
    assert!(first_history.is_empty());
    assert_eq!(tool_names, &vec!["wait_for_mentions".to_string(), "send_message".to_string()]);
    // The mention comes back to the model as a tool response
    let (_, second_history, _) = &seen[1];
    assert_eq!(second_history.len(), 2);
    let mention = second_history[1].content[0].as_tool_response().unwrap();
    assert_eq!(mention.id, "1");
    assert!(matches!(&mention.tool_result, Ok(content) if content[0].as_text().unwrap().contains("solar power")));

    assert_eq!(sleeper.slept.lock().unwrap().as_slice(), [Duration::from_secs(1)]);
}

#[tokio::test]
async fn test_lost_session_reconnects_and_keeps_looping() {
    let provider = ScriptedProvider::new(vec![
        call("1", "wait_for_mentions", json!({"timeoutMs": 8000})),
        call("2", "wait_for_mentions", json!({"timeoutMs": 8000})),
        Message::assistant().with_text("nothing to do"),
    ]);
    let coral = FakeCoral::new(vec![
        vec![Err(AgentError::Connection("stream closed".into()))],
        vec![],
    ]);
    let connects = coral.connects.clone();
    let sleeper = NoSleep::default();

    let mut driver = LoopDriver::new(
        driver_config(2),
        coral,
        Box::new(Agent::new(Box::new(provider))),
        Directive::for_profile(AgentProfile::Responder, "world_news_agent", ""),
        vec![],
    )
    .with_sleeper(sleeper.clone());

    driver.run().await.unwrap();

    assert_eq!(connects.lock().unwrap().len(), 2);
    assert_eq!(driver.iterations(), 2);
    assert_eq!(driver.failures(), 1);
    assert_eq!(
        sleeper.slept.lock().unwrap().as_slice(),
        [Duration::from_secs(5), Duration::from_secs(1)]
    );
}

#[tokio::test]
async fn test_invalid_server_url_is_fatal() {
    let mut config = driver_config(1);
    config.connection.base_url = "not a url".into();

    struct Mcp;

    #[async_trait]
    impl Connector for Mcp {
        async fn connect(
            &self,
            config: &ConnectionConfig,
        ) -> Result<Arc<dyn Toolbox>, ConnectionError> {
            Err(ConnectionError::InvalidUrl(config.base_url.clone()))
        }
    }

    let mut driver = LoopDriver::new(
        config,
        Mcp,
        Box::new(Agent::new(Box::new(ScriptedProvider::default()))),
        Directive::for_profile(AgentProfile::Responder, "a", ""),
        vec![],
    )
    .with_sleeper(NoSleep::default());

    let err = driver.run().await.unwrap_err();
    assert!(matches!(
        err,
        DriverError::Connection(ConnectionError::InvalidUrl(ref url)) if url == "not a url"
    ));
    assert_eq!(driver.iterations(), 0);
}
