use thiserror::Error;

use crate::tools::McpError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("No LLM provider available. Tried: {0}")]
    NoProvider(String),

    #[error("Model error ({provider}): {message}")]
    Model { provider: String, message: String },

    #[error("Agent response parse error: {0}")]
    Parse(String),

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Supervisor chose unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Delegation limit of {0} reached without the supervisor finishing")]
    DelegationLimit(usize),

    #[error("Agent {agent} exceeded {rounds} tool rounds")]
    ToolLoopLimit { agent: String, rounds: usize },

    #[error("Tool error: {0}")]
    Tool(#[from] McpError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    pub fn model(provider: impl Into<String>, message: impl Into<String>) -> Self {
        AgentError::Model {
            provider: provider.into(),
            message: message.into(),
        }
    }
}
