//! Chat-completion backends and the ordered fallback resolver.
//!
//! Every backend speaks the same [`ChatModel`] contract: given a system
//! prompt, the conversation so far and the callable tools, return one
//! assistant [`Message`], possibly carrying tool calls.

use async_trait::async_trait;
use stockdesk_models::{Message, ToolSpec};

use crate::error::AgentError;

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod resolver;

pub use anthropic::AnthropicModel;
pub use ollama::OllamaModel;
pub use openai::OpenAiModel;
pub use resolver::{
    resolve, HttpProviderFactory, ProviderAttempt, ProviderFactory, Resolution,
};

/// One model call.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub temperature: Option<f32>,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system: Some(system.into()),
            messages,
            tools: Vec::new(),
            temperature: None,
            max_tokens: 2048,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature.map(|t| t.clamp(0.0, 2.0));
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub provider: String,
    pub model: String,
}

impl std::fmt::Display for ModelInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// A callable chat-completion client. Mockable for testing.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn info(&self) -> ModelInfo;

    async fn invoke(&self, request: &ChatRequest) -> Result<Message, AgentError>;
}

/// Read a failed response body for an error message.
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    format!("HTTP {status}: {text}")
}

/// Arguments as the JSON string OpenAI-style APIs expect.
pub(crate) fn arguments_string(arguments: &serde_json::Value) -> String {
    if arguments.is_null() {
        "{}".to_string()
    } else {
        arguments.to_string()
    }
}

/// Arguments as a JSON object; null becomes `{}`.
pub(crate) fn arguments_object(arguments: &serde_json::Value) -> serde_json::Value {
    if arguments.is_null() {
        serde_json::json!({})
    } else {
        arguments.clone()
    }
}
