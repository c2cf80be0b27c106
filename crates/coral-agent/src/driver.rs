//! The loop that keeps one agent alive against a message server.
//!
//! ```text
//! INIT -> CONNECTING -> RUNNING <-> RECOVERING
//!              ^            |
//!              +------------+  (session lost)
//! ```
//!
//! A run step failure never ends the loop. The driver stops only when a bounded
//! connect retry runs out, when the tool set cannot be built, or when the
//! configured iteration limit is reached.
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::agent::Executor;
use crate::connection::{ConnectionConfig, ConnectionError, Connector};
use crate::errors::AgentError;
use crate::profile::Directive;
use crate::prompt_template::tools_description;
use crate::toolbox::Toolbox;
use crate::toolset::{ToolSet, ToolSetError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverState {
    Init,
    Connecting,
    Running,
    Recovering,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles from `initial` on every attempt, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay before the next try, given how many tries have failed so far (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn unbounded(delay: Duration) -> Self {
        Self::fixed(delay, None)
    }

    /// Whether another attempt may follow `attempts` failed ones
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_secs(5))
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// The message server the agent is registered with
    pub connection: ConnectionConfig,
    /// Extra MCP servers whose tools count as the agent's own
    pub tool_servers: Vec<ConnectionConfig>,
    pub connect_retry: RetryPolicy,
    /// Applied after a failed step, keyed on consecutive failures
    pub recover_backoff: Backoff,
    /// Pause between successful steps
    pub step_delay: Duration,
    /// One-shot prompts run once per process, resumed after a reconnect
    pub bootstrap: Vec<String>,
    /// Pause after the first bootstrap prompt
    pub bootstrap_settle: Duration,
    pub max_iterations: Option<u64>,
}

impl DriverConfig {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            tool_servers: Vec::new(),
            connect_retry: RetryPolicy::default(),
            recover_backoff: Backoff::Fixed(Duration::from_secs(5)),
            step_delay: Duration::from_secs(1),
            bootstrap: Vec::new(),
            bootstrap_settle: Duration::from_secs(8),
            max_iterations: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Gave up connecting to {url} after {attempts} attempts: {last}")]
    ConnectRetriesExhausted {
        url: String,
        attempts: u32,
        last: ConnectionError,
    },

    #[error(transparent)]
    Connection(ConnectionError),

    #[error(transparent)]
    ToolSet(#[from] ToolSetError),

    #[error("Failed to render the directive: {0}")]
    Directive(#[from] tera::Error),
}

enum SessionEnd {
    Finished,
    Disconnected,
}

pub struct LoopDriver<C: Connector, S: Sleeper = TokioSleeper> {
    config: DriverConfig,
    connector: C,
    executor: Box<dyn Executor>,
    directive: Directive,
    local: Vec<Arc<dyn Toolbox>>,
    sleeper: S,
    state: DriverState,
    iterations: u64,
    failures: u64,
    /// Bootstrap prompts that have run to an outcome
    bootstrap_done: usize,
}

impl<C: Connector> LoopDriver<C, TokioSleeper> {
    pub fn new(
        config: DriverConfig,
        connector: C,
        executor: Box<dyn Executor>,
        directive: Directive,
        local: Vec<Arc<dyn Toolbox>>,
    ) -> Self {
        Self {
            config,
            connector,
            executor,
            directive,
            local,
            sleeper: TokioSleeper,
            state: DriverState::Init,
            iterations: 0,
            failures: 0,
            bootstrap_done: 0,
        }
    }
}

impl<C: Connector, S: Sleeper> LoopDriver<C, S> {
    pub fn with_sleeper<T: Sleeper>(self, sleeper: T) -> LoopDriver<C, T> {
        LoopDriver {
            config: self.config,
            connector: self.connector,
            executor: self.executor,
            directive: self.directive,
            local: self.local,
            sleeper,
            state: self.state,
            iterations: self.iterations,
            failures: self.failures,
            bootstrap_done: self.bootstrap_done,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Loop iterations started so far, bootstrap prompts excluded
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Failed steps so far, bootstrap prompts included
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Drive the agent until a terminal condition is reached
    pub async fn run(&mut self) -> Result<(), DriverError> {
        let result = self.drive().await;
        self.state = DriverState::Stopped;
        result
    }

    async fn drive(&mut self) -> Result<(), DriverError> {
        loop {
            self.state = DriverState::Connecting;
            let tools = self.connect_all().await?;
            let directive = self.directive.render(&tools)?;
            info!(
                "Tools Description:\n{}",
                tools_description(&tools.tools())
            );

            self.state = DriverState::Running;
            match self.run_session(&directive, &tools).await {
                SessionEnd::Finished => return Ok(()),
                SessionEnd::Disconnected => {
                    warn!("Session lost, reconnecting");
                }
            }
        }
    }

    async fn connect_all(&self) -> Result<ToolSet, DriverError> {
        let coral = self.connect_with_retry(&self.config.connection).await?;

        let mut local = Vec::with_capacity(self.config.tool_servers.len() + self.local.len());
        for server in &self.config.tool_servers {
            local.push(self.connect_with_retry(server).await?);
        }
        local.extend(self.local.iter().cloned());

        Ok(ToolSet::compose(vec![coral], local)?)
    }

    async fn connect_with_retry(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn Toolbox>, DriverError> {
        let policy = self.config.connect_retry;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.connector.connect(config).await {
                Ok(toolbox) => {
                    info!(server = %config.base_url, attempts, "Connected");
                    return Ok(toolbox);
                }
                Err(e @ ConnectionError::InvalidUrl(_)) => {
                    return Err(DriverError::Connection(e));
                }
                Err(e) => {
                    if !policy.allows(attempts) {
                        error!(attempts, error = %e, "Max retries reached. Exiting.");
                        return Err(DriverError::ConnectRetriesExhausted {
                            url: config.base_url.clone(),
                            attempts,
                            last: e,
                        });
                    }
                    let delay = policy.backoff.delay(attempts);
                    error!(attempts, error = %e, "Connection attempt failed, retrying in {:?}", delay);
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }

    async fn run_session(&mut self, directive: &str, tools: &ToolSet) -> SessionEnd {
        let mut consecutive_failures = 0u32;

        // A prompt cut off by a lost session runs again on the next session
        let prompts = self.config.bootstrap.clone();
        while let Some(prompt) = prompts.get(self.bootstrap_done) {
            info!(prompt = %prompt, "Running bootstrap prompt");
            match self.executor.run_step(directive, Some(prompt), tools).await {
                Ok(_) => consecutive_failures = 0,
                Err(e) => {
                    self.failures += 1;
                    consecutive_failures += 1;
                    self.state = DriverState::Recovering;
                    error!("Error in bootstrap step: {}", e);
                    self.sleeper
                        .sleep(self.config.recover_backoff.delay(consecutive_failures))
                        .await;
                    if is_connection_lost(&e) {
                        return SessionEnd::Disconnected;
                    }
                    self.state = DriverState::Running;
                }
            }
            self.bootstrap_done += 1;
            if self.bootstrap_done == 1 && prompts.len() > 1 {
                self.sleeper.sleep(self.config.bootstrap_settle).await;
            }
        }

        loop {
            if self
                .config
                .max_iterations
                .is_some_and(|max| self.iterations >= max)
            {
                info!(iterations = self.iterations, "Iteration limit reached");
                return SessionEnd::Finished;
            }
            self.iterations += 1;

            info!("Starting new agent invocation");
            match self.executor.run_step(directive, None, tools).await {
                Ok(outcome) => {
                    consecutive_failures = 0;
                    info!(
                        tool_calls = outcome.tool_calls,
                        "Completed agent invocation, restarting loop"
                    );
                    self.sleeper.sleep(self.config.step_delay).await;
                }
                Err(e) => {
                    self.failures += 1;
                    consecutive_failures += 1;
                    self.state = DriverState::Recovering;
                    error!("Error in agent loop: {}", e);

                    self.sleeper
                        .sleep(self.config.recover_backoff.delay(consecutive_failures))
                        .await;
                    if is_connection_lost(&e) {
                        return SessionEnd::Disconnected;
                    }
                    self.state = DriverState::Running;
                }
            }
        }
    }
}

fn is_connection_lost(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<AgentError>(),
        Some(AgentError::Connection(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::StepOutcome;
    use crate::connection::TransportKind;
    use crate::toolbox::testing::StaticToolbox;
    use anyhow::anyhow;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingSleeper {
        slept: Arc<Mutex<Vec<Duration>>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    struct FakeConnector {
        failures_before_success: Mutex<u32>,
        attempts: Arc<Mutex<u32>>,
        tools: Vec<&'static str>,
    }

    impl FakeConnector {
        fn new(failures_before_success: u32) -> Self {
            Self {
                failures_before_success: Mutex::new(failures_before_success),
                attempts: Arc::new(Mutex::new(0)),
                tools: vec!["send_message", "wait_for_mentions"],
            }
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(
            &self,
            config: &ConnectionConfig,
        ) -> Result<Arc<dyn Toolbox>, ConnectionError> {
            *self.attempts.lock().unwrap() += 1;
            let mut remaining = self.failures_before_success.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ConnectionError::Unreachable {
                    url: config.base_url.clone(),
                    reason: "connection refused".into(),
                });
            }
            Ok(Arc::new(StaticToolbox::new("coral", &self.tools)))
        }
    }

    #[derive(Clone, Default)]
    struct ScriptedExecutor {
        results: Arc<Mutex<VecDeque<Result<(), AgentError>>>>,
        inputs: Arc<Mutex<Vec<Option<String>>>>,
        directives: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedExecutor {
        fn with(results: Vec<Result<(), AgentError>>) -> Self {
            Self {
                results: Arc::new(Mutex::new(results.into())),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn run_step(
            &self,
            directive: &str,
            input: Option<&str>,
            _tools: &ToolSet,
        ) -> anyhow::Result<StepOutcome> {
            self.directives.lock().unwrap().push(directive.to_string());
            self.inputs.lock().unwrap().push(input.map(str::to_string));
            match self.results.lock().unwrap().pop_front() {
                Some(Err(AgentError::Internal(msg))) => Err(anyhow!(msg)),
                Some(Err(e)) => Err(e.into()),
                _ => Ok(StepOutcome::default()),
            }
        }
    }

    fn config(max_iterations: Option<u64>) -> DriverConfig {
        let mut config = DriverConfig::new(ConnectionConfig {
            transport: TransportKind::Sse,
            base_url: "http://localhost:5555/sse".into(),
            params: None,
            timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
        });
        config.max_iterations = max_iterations;
        config
    }

    fn driver(
        config: DriverConfig,
        connector: FakeConnector,
        executor: ScriptedExecutor,
        sleeper: RecordingSleeper,
    ) -> LoopDriver<FakeConnector, RecordingSleeper> {
        LoopDriver::new(
            config,
            connector,
            Box::new(executor),
            Directive::new("You are {{ agent_id }}.\n{{ tools_description }}", "tester", "a test agent"),
            vec![],
        )
        .with_sleeper(sleeper)
    }

    #[test]
    fn test_backoff_delays() {
        let fixed = Backoff::Fixed(Duration::from_secs(5));
        assert_eq!(fixed.delay(1), Duration::from_secs(5));
        assert_eq!(fixed.delay(9), Duration::from_secs(5));

        let exp = Backoff::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
        };
        assert_eq!(exp.delay(1), Duration::from_secs(1));
        assert_eq!(exp.delay(2), Duration::from_secs(2));
        assert_eq!(exp.delay(4), Duration::from_secs(8));
        assert_eq!(exp.delay(5), Duration::from_secs(10));
        assert_eq!(exp.delay(64), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_policy_bounds() {
        let bounded = RetryPolicy::fixed(Duration::from_secs(5), Some(3));
        assert!(bounded.allows(1));
        assert!(bounded.allows(2));
        assert!(!bounded.allows(3));
        assert!(RetryPolicy::unbounded(Duration::from_secs(5)).allows(u32::MAX - 1));
    }

    #[tokio::test]
    async fn test_successful_steps_sleep_step_delay() {
        let sleeper = RecordingSleeper::default();
        let executor = ScriptedExecutor::default();
        let mut driver = driver(config(Some(3)), FakeConnector::new(0), executor.clone(), sleeper.clone());

        driver.run().await.unwrap();

        assert_eq!(driver.iterations(), 3);
        assert_eq!(driver.failures(), 0);
        assert_eq!(driver.state(), DriverState::Stopped);
        assert_eq!(*sleeper.slept.lock().unwrap(), vec![Duration::from_secs(1); 3]);
        assert_eq!(
            executor.directives.lock().unwrap()[0],
            "You are tester.\nTool: send_message, Schema: {\"type\":\"object\"}\nTool: wait_for_mentions, Schema: {\"type\":\"object\"}"
        );
    }

    #[tokio::test]
    async fn test_loop_continues_after_failure() {
        let sleeper = RecordingSleeper::default();
        let executor = ScriptedExecutor::with(vec![
            Err(AgentError::Internal("model timed out".into())),
            Ok(()),
        ]);
        let mut driver = driver(config(Some(2)), FakeConnector::new(0), executor, sleeper.clone());

        driver.run().await.unwrap();

        assert_eq!(driver.iterations(), 2);
        assert_eq!(driver.failures(), 1);
        assert_eq!(
            *sleeper.slept.lock().unwrap(),
            vec![Duration::from_secs(5), Duration::from_secs(1)]
        );
    }

    #[tokio::test]
    async fn test_recover_backoff_grows_with_consecutive_failures() {
        let sleeper = RecordingSleeper::default();
        let executor = ScriptedExecutor::with(vec![
            Err(AgentError::Internal("a".into())),
            Err(AgentError::Internal("b".into())),
            Ok(()),
            Err(AgentError::Internal("c".into())),
        ]);
        let mut cfg = config(Some(4));
        cfg.recover_backoff = Backoff::Exponential {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(60),
        };
        let mut driver = driver(cfg, FakeConnector::new(0), executor, sleeper.clone());

        driver.run().await.unwrap();

        assert_eq!(
            *sleeper.slept.lock().unwrap(),
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(1),
                Duration::from_secs(5),
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_retries_until_success() {
        let sleeper = RecordingSleeper::default();
        let connector = FakeConnector::new(2);
        let attempts = connector.attempts.clone();
        let mut driver = driver(config(Some(1)), connector, ScriptedExecutor::default(), sleeper.clone());

        driver.run().await.unwrap();

        assert_eq!(*attempts.lock().unwrap(), 3);
        assert_eq!(
            sleeper.slept.lock().unwrap()[..2],
            [Duration::from_secs(5), Duration::from_secs(5)]
        );
    }

    #[tokio::test]
    async fn test_bounded_connect_retries_are_terminal() {
        let sleeper = RecordingSleeper::default();
        let mut cfg = config(None);
        cfg.connect_retry = RetryPolicy::fixed(Duration::from_secs(5), Some(3));
        let mut driver = driver(cfg, FakeConnector::new(10), ScriptedExecutor::default(), sleeper.clone());

        let err = driver.run().await.unwrap_err();

        assert!(matches!(
            err,
            DriverError::ConnectRetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(driver.iterations(), 0);
        assert_eq!(driver.state(), DriverState::Stopped);
        assert_eq!(sleeper.slept.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_lost_session_reconnects() {
        let sleeper = RecordingSleeper::default();
        let connector = FakeConnector::new(0);
        let attempts = connector.attempts.clone();
        let executor = ScriptedExecutor::with(vec![
            Ok(()),
            Err(AgentError::Connection("session closed".into())),
            Ok(()),
        ]);
        let mut driver = driver(config(Some(3)), connector, executor, sleeper);

        driver.run().await.unwrap();

        assert_eq!(*attempts.lock().unwrap(), 2);
        assert_eq!(driver.iterations(), 3);
        assert_eq!(driver.failures(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_runs_once_with_settle_delay() {
        let sleeper = RecordingSleeper::default();
        let executor = ScriptedExecutor::with(vec![
            Ok(()),
            Ok(()),
            Ok(()),
            Err(AgentError::Connection("gone".into())),
        ]);
        let mut cfg = config(Some(2));
        cfg.bootstrap = vec![
            "Register".to_string(),
            "Check in".to_string(),
            "Ask the user".to_string(),
        ];
        let mut driver = driver(cfg, FakeConnector::new(0), executor.clone(), sleeper.clone());

        driver.run().await.unwrap();

        let inputs = executor.inputs.lock().unwrap().clone();
        assert_eq!(
            inputs,
            vec![
                Some("Register".to_string()),
                Some("Check in".to_string()),
                Some("Ask the user".to_string()),
                None,
                None,
            ]
        );
        assert_eq!(sleeper.slept.lock().unwrap()[0], Duration::from_secs(8));
    }

    fn bootstrap_config() -> DriverConfig {
        let mut cfg = config(Some(1));
        cfg.bootstrap = vec![
            "Register".to_string(),
            "Check in".to_string(),
            "Ask the user".to_string(),
        ];
        cfg
    }

    #[tokio::test]
    async fn test_bootstrap_resumes_after_lost_session() {
        let sleeper = RecordingSleeper::default();
        let connector = FakeConnector::new(0);
        let attempts = connector.attempts.clone();
        let executor = ScriptedExecutor::with(vec![Err(AgentError::Connection("gone".into()))]);
        let mut driver = driver(bootstrap_config(), connector, executor.clone(), sleeper.clone());

        driver.run().await.unwrap();

        assert_eq!(*attempts.lock().unwrap(), 2);
        assert_eq!(
            *executor.inputs.lock().unwrap(),
            vec![
                Some("Register".to_string()),
                Some("Register".to_string()),
                Some("Check in".to_string()),
                Some("Ask the user".to_string()),
                None,
            ]
        );
        assert_eq!(driver.failures(), 1);
        assert_eq!(
            *sleeper.slept.lock().unwrap(),
            vec![
                Duration::from_secs(5),
                Duration::from_secs(8),
                Duration::from_secs(1),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_bootstrap_prompt_sleeps_recover_delay_and_moves_on() {
        let sleeper = RecordingSleeper::default();
        let connector = FakeConnector::new(0);
        let attempts = connector.attempts.clone();
        let executor = ScriptedExecutor::with(vec![
            Ok(()),
            Err(AgentError::Internal("model refused".into())),
        ]);
        let mut driver = driver(bootstrap_config(), connector, executor.clone(), sleeper.clone());

        driver.run().await.unwrap();

        assert_eq!(*attempts.lock().unwrap(), 1);
        assert_eq!(
            *executor.inputs.lock().unwrap(),
            vec![
                Some("Register".to_string()),
                Some("Check in".to_string()),
                Some("Ask the user".to_string()),
                None,
            ]
        );
        assert_eq!(driver.failures(), 1);
        assert_eq!(
            *sleeper.slept.lock().unwrap(),
            vec![
                Duration::from_secs(8),
                Duration::from_secs(5),
                Duration::from_secs(1),
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_local_tool_is_fatal() {
        let mut driver = LoopDriver::new(
            config(Some(1)),
            FakeConnector::new(0),
            Box::new(ScriptedExecutor::default()),
            Directive::new("{{ agent_id }}", "tester", ""),
            vec![Arc::new(StaticToolbox::new("local", &["send_message"]))],
        )
        .with_sleeper(RecordingSleeper::default());

        let err = driver.run().await.unwrap_err();
        assert!(matches!(err, DriverError::ToolSet(ToolSetError::DuplicateTool { .. })));
        assert_eq!(driver.iterations(), 0);
    }
}
