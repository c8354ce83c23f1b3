//! Anthropic Messages API backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stockdesk_models::{Message, Role, ToolCall};
use tracing::debug;

use super::{arguments_object, error_body, ChatModel, ChatRequest, ModelInfo};
use crate::error::AgentError;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Appended when the conversation ends on an assistant turn, which the
/// Messages API would otherwise treat as a prefill to continue.
const CONTINUE_NUDGE: &str = "Continue with your part of the task.";

pub struct AnthropicModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicModel {
    pub fn new(
        client: reqwest::Client,
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize, Debug, PartialEq)]
struct ApiMessage {
    role: &'static str,
    content: Vec<Block>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Serialize)]
struct ApiTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<Block>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Split out system text and fold the transcript into alternating
/// user/assistant turns of content blocks.
fn convert_messages(request: &ChatRequest) -> (Option<String>, Vec<ApiMessage>) {
    let mut system_parts: Vec<String> = request.system.iter().cloned().collect();
    let mut turns: Vec<ApiMessage> = Vec::new();

    for msg in &request.messages {
        let (role, blocks) = match msg.role {
            Role::System => {
                system_parts.push(msg.content.clone());
                continue;
            }
            Role::User => ("user", text_block(&msg.content).into_iter().collect()),
            Role::Tool => (
                "user",
                vec![Block::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: msg.content.clone(),
                    is_error: msg.is_error,
                }],
            ),
            Role::Assistant => {
                let mut blocks: Vec<Block> = text_block(&msg.content).into_iter().collect();
                blocks.extend(msg.tool_calls.iter().map(|call| Block::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: arguments_object(&call.arguments),
                }));
                ("assistant", blocks)
            }
        };

        if blocks.is_empty() {
            continue;
        }
        match turns.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => turns.push(ApiMessage {
                role,
                content: blocks,
            }),
        }
    }

    if turns.last().map_or(true, |t| t.role == "assistant") {
        turns.push(ApiMessage {
            role: "user",
            content: vec![Block::Text {
                text: CONTINUE_NUDGE.to_string(),
            }],
        });
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, turns)
}

fn text_block(text: &str) -> Option<Block> {
    if text.trim().is_empty() {
        None
    } else {
        Some(Block::Text {
            text: text.to_string(),
        })
    }
}

fn into_message(blocks: Vec<Block>) -> Message {
    let mut text = Vec::new();
    let mut calls = Vec::new();
    for block in blocks {
        match block {
            Block::Text { text: t } => text.push(t),
            Block::ToolUse { id, name, input } => calls.push(ToolCall::new(id, name, input)),
            Block::ToolResult { .. } | Block::Unsupported => {}
        }
    }
    Message::assistant(text.join("")).with_tool_calls(calls)
}

#[async_trait]
impl ChatModel for AnthropicModel {
    fn info(&self) -> ModelInfo {
        ModelInfo {
            provider: "anthropic".to_string(),
            model: self.model.clone(),
        }
    }

    async fn invoke(&self, request: &ChatRequest) -> Result<Message, AgentError> {
        let (system, messages) = convert_messages(request);
        let body = ApiRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            system,
            messages,
            tools: request
                .tools
                .iter()
                .map(|t| ApiTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.input_schema,
                })
                .collect(),
            temperature: request.temperature,
        };

        debug!(model = %self.model, messages = body.messages.len(), tools = body.tools.len(), "Invoking Anthropic");

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::model("anthropic", format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let text = error_body(response).await;
            let message = text
                .split_once(": ")
                .and_then(|(_, raw)| serde_json::from_str::<ApiError>(raw).ok())
                .map(|e| format!("{}: {}", e.error.error_type, e.error.message))
                .unwrap_or(text);
            return Err(AgentError::model("anthropic", message));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| AgentError::model("anthropic", format!("invalid response: {e}")))?;

        Ok(into_message(parsed.content))
    }
}
