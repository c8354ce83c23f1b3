//! OpenAI chat-completions backend.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use stockdesk_models::{Message, Role, ToolCall};
use tracing::debug;

use super::{arguments_string, error_body, ChatModel, ChatRequest, ModelInfo};
use crate::error::AgentError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiModel {
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

/// OpenAI only accepts `^[a-zA-Z0-9_-]+$` in the `name` field.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn convert_message(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content,
        }),
        Role::Assistant => {
            let content = if msg.content.is_empty() {
                Value::Null
            } else {
                Value::String(msg.content.clone())
            };
            let mut out = json!({"role": "assistant", "content": content});
            if let Some(name) = &msg.name {
                out["name"] = Value::String(sanitize_name(name));
            }
            if msg.has_tool_calls() {
                out["tool_calls"] = msg
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": arguments_string(&call.arguments),
                            }
                        })
                    })
                    .collect();
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

    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": request.max_tokens,
    });
    if let Some(t) = request.temperature {
        body["temperature"] = json!(t);
    }
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
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn into_message(msg: ApiMessage) -> Message {
    let calls = msg
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| {
            // Malformed argument JSON is passed through as a string so the
            // tool layer can report it back to the model.
            let args = serde_json::from_str(&c.function.arguments)
                .unwrap_or(Value::String(c.function.arguments));
            ToolCall::new(c.id, c.function.name, args)
        })
        .collect();
    Message::assistant(msg.content.unwrap_or_default()).with_tool_calls(calls)
}

#[async_trait]
impl ChatModel for OpenAiModel {
    fn info(&self) -> ModelInfo {
        ModelInfo {
            provider: "openai".to_string(),
            model: self.model.clone(),
        }
    }

    async fn invoke(&self, request: &ChatRequest) -> Result<Message, AgentError> {
        let body = build_body(&self.model, request);
        debug!(model = %self.model, messages = request.messages.len(), tools = request.tools.len(), "Invoking OpenAI");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::model("openai", format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AgentError::model("openai", error_body(response).await));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| AgentError::model("openai", format!("invalid response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::model("openai", "response had no choices"))?;

        Ok(into_message(choice.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockdesk_models::ToolSpec;

    #[test]
    fn body_includes_system_tools_and_tool_messages() {
        let call = ToolCall::new("call_1", "search_engine", json!({"query": "KO news"}));
        let request = ChatRequest::new(
            "You are a financial news analyst.",
            vec![
                Message::user("q"),
                Message::assistant("")
                    .with_name("news_analyst_agent")
                    .with_tool_calls(vec![call.clone()]),
                Message::tool_result(&call, "Coca-Cola beats estimates"),
            ],
        )
        .with_tools(vec![ToolSpec::new("search_engine", "Search the web")]);

        let body = build_body("gpt-4o-mini", &request);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[2]["content"], Value::Null);
        assert_eq!(messages[2]["tool_calls"][0]["function"]["arguments"], r#"{"query":"KO news"}"#);
        assert_eq!(messages[3]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["function"]["name"], "search_engine");
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_name("price recommender.v2"), "price_recommender_v2");
    }

    #[test]
    fn tool_call_arguments_are_parsed() {
        let msg: ApiMessage = serde_json::from_value(json!({
            "content": null,
            "tool_calls": [
                {"id": "call_a", "type": "function", "function": {"name": "scrape_as_markdown", "arguments": "{\"url\":\"https://example.com\"}"}},
                {"id": "call_b", "type": "function", "function": {"name": "search_engine", "arguments": "not json"}}
            ]
        }))
        .unwrap();

        let message = into_message(msg);
        assert_eq!(message.content, "");
        assert_eq!(message.tool_calls[0].arguments["url"], "https://example.com");
        assert_eq!(message.tool_calls[1].arguments, Value::String("not json".into()));
    }

    #[test]
    fn null_tool_calls_is_a_plain_answer() {
        let msg: ApiMessage = serde_json::from_value(json!({
            "content": "Hold KO",
            "tool_calls": null
        }))
        .unwrap();

        let message = into_message(msg);
        assert_eq!(message.content, "Hold KO");
        assert!(!message.has_tool_calls());
    }
}
