use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised at the tool boundary.
///
/// These travel inside tool responses so the model can read them, which is why
/// the type is serializable and cloneable.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    /// The session backing a remote tool is gone; the step cannot continue.
    #[error("Connection lost: {0}")]
    Connection(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
