//! Ollama backend (local, free, runs on your machine).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use stockdesk_models::{Message, Role, ToolCall};
use tracing::debug;
use uuid::Uuid;

use super::{arguments_object, error_body, ChatModel, ChatRequest, ModelInfo};
use crate::error::AgentError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub struct OllamaModel {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

impl OllamaModel {
    pub fn new(client: reqwest::Client, model: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            client,
            model: model.into(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the local server answers at all.
    pub async fn probe(&self) -> Result<(), AgentError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                AgentError::model("ollama", format!("not reachable at {}: {e}", self.base_url))
            })?;

        if !response.status().is_success() {
            return Err(AgentError::model("ollama", error_body(response).await));
        }
        Ok(())
    }
}

fn convert_message(msg: &Message) -> Value {
    match msg.role {
        Role::Assistant => {
            let mut out = json!({"role": "assistant", "content": msg.content});
            if msg.has_tool_calls() {
                out["tool_calls"] = msg
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "function": {
                                "name": call.name,
                                "arguments": arguments_object(&call.arguments),
                            }
                        })
                    })
                    .collect();
            }
            out
        }
        Role::Tool => {
            let mut out = json!({"role": "tool", "content": msg.content});
            if let Some(name) = &msg.name {
                out["tool_name"] = Value::String(name.clone());
            }
            out
        }
        Role::User => json!({"role": "user", "content": msg.content}),
        Role::System => json!({"role": "system", "content": msg.content}),
    }
}

fn build_body(model: &str, request: &ChatRequest) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.extend(request.messages.iter().map(convert_message));

    let mut options = json!({"num_predict": request.max_tokens});
    if let Some(t) = request.temperature {
        options["temperature"] = json!(t);
    }

    let mut body = json!({
        "model": model,
        "messages": messages,
        "stream": false,
        "options": options,
    });
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
    }
    body
}

#[derive(Deserialize)]
struct ApiResponse {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Ollama does not assign call ids, so each call gets a fresh one.
fn into_message(msg: ApiMessage) -> Message {
    let calls = msg
        .tool_calls
        .into_iter()
        .map(|c| ToolCall::new(format!("call_{}", Uuid::new_v4().simple()), c.function.name, c.function.arguments))
        .collect();
    Message::assistant(msg.content).with_tool_calls(calls)
}

#[async_trait]
impl ChatModel for OllamaModel {
    fn info(&self) -> ModelInfo {
        ModelInfo {
            provider: "ollama".to_string(),
            model: self.model.clone(),
        }
    }

    async fn invoke(&self, request: &ChatRequest) -> Result<Message, AgentError> {
        let body = build_body(&self.model, request);
        debug!(model = %self.model, messages = request.messages.len(), tools = request.tools.len(), "Invoking Ollama");

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::model("ollama", format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AgentError::model("ollama", error_body(response).await));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| AgentError::model("ollama", format!("invalid response: {e}")))?;

        Ok(into_message(parsed.message))
    }
}
