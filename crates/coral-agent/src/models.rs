//! These models represent the objects passed around by the agent during a run step
//!
//! Two external formats overlap with them:
//! - openai messages/tools, sent from the agent to the LLM
//! - mcp tools and call results, exchanged with the coral server and tool servers
//!
//! Both are converted into these internal structs at the edge, so the executor
//! and the toolboxes never see wire formats.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
