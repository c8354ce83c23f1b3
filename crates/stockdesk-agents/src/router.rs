//! Routing: deciding which specialist acts next, or that the run is over.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use stockdesk_models::{Message, Role, Transcript};
use tracing::debug;

use crate::error::AgentError;
use crate::llm::{ChatModel, ChatRequest};
use crate::parser::{parse_route_decision, DONE};

/// Longest slice of any single message shown to the routing model.
const MAX_RENDERED_CHARS: usize = 4000;

/// A specialist as the router sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub name: String,
    pub description: String,
}

impl RosterEntry {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Delegate { agent: String },
    Done { summary: Option<String> },
}

/// Chooses the next specialist. Mockable for testing.
#[async_trait]
pub trait Router: Send + Sync {
    async fn choose_next(
        &self,
        transcript: &Transcript,
        roster: &[RosterEntry],
    ) -> Result<RouteDecision, AgentError>;
}

/// Routes by asking the shared model with the supervisor prompt.
pub struct LlmRouter {
    model: Arc<dyn ChatModel>,
    prompt: String,
    max_tokens: u32,
}

impl LlmRouter {
    pub fn new(model: Arc<dyn ChatModel>, prompt: impl Into<String>) -> Self {
        Self {
            model,
            prompt: prompt.into(),
            max_tokens: 1024,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn request(&self, transcript: &Transcript, roster: &[RosterEntry]) -> ChatRequest {
        let system = routing_system_prompt(&self.prompt, roster);
        let conversation = format!(
            "Conversation so far:\n\n{}\n\nDecide the next step.",
            render_transcript(transcript)
        );
        ChatRequest::new(system, vec![Message::user(conversation)])
            .with_temperature(Some(0.0))
            .with_max_tokens(self.max_tokens)
    }
}

#[async_trait]
impl Router for LlmRouter {
    async fn choose_next(
        &self,
        transcript: &Transcript,
        roster: &[RosterEntry],
    ) -> Result<RouteDecision, AgentError> {
        let start = Instant::now();
        let reply = self.model.invoke(&self.request(transcript, roster)).await?;
        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            reply_len = reply.content.len(),
            "Routing reply received"
        );
        parse_route_decision(&reply.content, roster)
    }
}

/// Supervisor instructions followed by the roster and the reply protocol.
pub fn routing_system_prompt(prompt: &str, roster: &[RosterEntry]) -> String {
    let mut out = String::from(prompt.trim());
    out.push_str("\n\nAgents you can assign work to:\n");
    for entry in roster {
        out.push_str(&format!("- {}: {}\n", entry.name, entry.description));
    }
    out.push_str(&format!(
        "\nReply with a single JSON object and nothing else.\n\
         To assign the next step: {{\"next\": \"<agent name>\"}}\n\
         When the request is fully answered: {{\"next\": \"{DONE}\", \"summary\": \"<final answer for the user>\"}}\n"
    ));
    out
}

/// The transcript as labelled plain text, one block per message. Hand-off
/// records are left out so they never influence routing.
pub fn render_transcript(transcript: &Transcript) -> String {
    transcript
        .messages()
        .iter()
        .filter(|m| !m.is_handoff())
        .map(render_message)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_message(message: &Message) -> String {
    let label = match message.role {
        Role::User => "user".to_string(),
        Role::System => "system".to_string(),
        Role::Assistant => message.name.clone().unwrap_or_else(|| "assistant".to_string()),
        Role::Tool => format!("tool {}", message.name.as_deref().unwrap_or("result")),
    };

    let mut body = truncate(&message.content, MAX_RENDERED_CHARS);
    if message.has_tool_calls() {
        let names: Vec<&str> = message.tool_calls.iter().map(|c| c.name.as_str()).collect();
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(&format!("(called tools: {})", names.join(", ")));
    }
    format!("[{label}] {body}")
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedModel;
    use serde_json::json;
    use stockdesk_models::ToolCall;

    fn roster() -> Vec<RosterEntry> {
        vec![
            RosterEntry::new("stock_finder_agent", "Picks promising NYSE stocks"),
            RosterEntry::new("market_data_agent", "Fetches market data"),
        ]
    }

    #[test]
    fn system_prompt_lists_roster_and_protocol() {
        let prompt = routing_system_prompt("You are a supervisor managing four agents.", &roster());
        assert!(prompt.starts_with("You are a supervisor managing four agents."));
        assert!(prompt.contains("- stock_finder_agent: Picks promising NYSE stocks"));
        assert!(prompt.contains(r#"{"next": "done", "summary""#));
    }

    #[test]
    fn transcript_renders_labels() {
        let call = ToolCall::new("call_1", "search_engine", json!({}));
        let mut transcript = Transcript::new("Give me good stock recommendation from NYSE");
        transcript.push(Message::handoff_start("stock_finder_agent"));
        transcript.push(
            Message::assistant("")
                .with_name("stock_finder_agent")
                .with_tool_calls(vec![call.clone()]),
        );
        transcript.push(Message::tool_result(&call, "KO, JPM"));

        let text = render_transcript(&transcript);
        assert_eq!(
            text,
            "[user] Give me good stock recommendation from NYSE\n\n\
             [stock_finder_agent] (called tools: search_engine)\n\n\
             [tool search_engine] KO, JPM"
        );
    }

    #[test]
    fn long_messages_are_truncated() {
        let long = "x".repeat(MAX_RENDERED_CHARS + 10);
        let rendered = render_message(&Message::user(long));
        assert!(rendered.ends_with("..."));
        assert_eq!(rendered.len(), "[user] ".len() + MAX_RENDERED_CHARS + 3);
    }

    #[tokio::test]
    async fn llm_router_parses_reply() {
        let model = Arc::new(ScriptedModel::new(vec![Message::assistant(
            "```json\n{\"next\": \"Market_Data_Agent\"}\n```",
        )]));
        let router = LlmRouter::new(model.clone(), "Supervise.");

        let decision = router
            .choose_next(&Transcript::new("q"), &roster())
            .await
            .unwrap();
        assert_eq!(
            decision,
            RouteDecision::Delegate {
                agent: "market_data_agent".into()
            }
        );

        let requests = model.requests();
        let request = &requests[0];
        assert_eq!(request.temperature, Some(0.0));
        assert!(request.tools.is_empty());
        assert!(request.messages[0].content.contains("[user] q"));
    }

    #[tokio::test]
    async fn llm_router_rejects_unknown_agent() {
        let model = Arc::new(ScriptedModel::new(vec![Message::assistant(r#"{"next": "risk_agent"}"#)]));
        let router = LlmRouter::new(model, "Supervise.");

        let err = router
            .choose_next(&Transcript::new("q"), &roster())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownAgent(name) if name == "risk_agent"));
    }
}
