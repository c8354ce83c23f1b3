use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use stockdesk_models::{AgentConfig, AgentsConfig, Message, Transcript, TranscriptUpdate};
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::llm::{ChatModel, ChatRequest};
use crate::printer::UpdateSink;
use crate::tools::ToolSet;

/// Node names used for a specialist's inner steps in the update stream.
pub const MODEL_NODE: &str = "agent";
pub const TOOLS_NODE: &str = "tools";

/// Trait for specialist agents. Mockable for testing.
#[async_trait]
pub trait SpecialistAgent: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// Take a turn: read the transcript, append this agent's messages, and
    /// return how many were appended.
    async fn act(&self, transcript: &mut Transcript, updates: &UpdateSink)
        -> Result<usize, AgentError>;
}

/// A specialist that loops model → tools → model until the model answers
/// without requesting tools.
pub struct ReactSpecialist {
    name: String,
    description: String,
    prompt: String,
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolSet>,
    max_tool_rounds: usize,
    temperature: Option<f32>,
    max_tokens: u32,
}

impl ReactSpecialist {
    pub fn new(
        name: impl Into<String>,
        prompt: impl Into<String>,
        model: Arc<dyn ChatModel>,
        tools: Arc<ToolSet>,
    ) -> Self {
        let defaults = AgentsConfig::default();
        Self {
            name: name.into(),
            description: String::new(),
            prompt: prompt.into(),
            model,
            tools,
            max_tool_rounds: defaults.max_tool_rounds,
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
        }
    }

    pub fn from_config(
        agent: &AgentConfig,
        limits: &AgentsConfig,
        prompt: impl Into<String>,
        model: Arc<dyn ChatModel>,
        tools: Arc<ToolSet>,
    ) -> Self {
        Self::new(agent.name.clone(), prompt, model, tools)
            .with_description(agent.description.clone())
            .with_max_tool_rounds(limits.max_tool_rounds)
            .with_sampling(limits.temperature, limits.max_tokens)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_sampling(mut self, temperature: Option<f32>, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    fn request(&self, transcript: &Transcript) -> ChatRequest {
        ChatRequest::new(self.prompt.clone(), transcript.messages().to_vec())
            .with_tools(self.tools.specs())
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }

    async fn run_tools(&self, reply: &Message) -> Vec<Message> {
        let mut results = Vec::with_capacity(reply.tool_calls.len());
        for call in &reply.tool_calls {
            let start = Instant::now();
            let message = match self.tools.invoke(&call.name, call.arguments.clone()).await {
                Ok(text) => {
                    debug!(agent = %self.name, tool = %call.name, elapsed_ms = start.elapsed().as_millis() as u64, "Tool succeeded");
                    Message::tool_result(call, text)
                }
                Err(e) => {
                    warn!(agent = %self.name, tool = %call.name, error = %e, "Tool failed");
                    Message::tool_error(call, e)
                }
            };
            results.push(message);
        }
        results
    }
}

#[async_trait]
impl SpecialistAgent for ReactSpecialist {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn act(
        &self,
        transcript: &mut Transcript,
        updates: &UpdateSink,
    ) -> Result<usize, AgentError> {
        let mark = transcript.len();
        let start = Instant::now();
        let mut rounds = 0;

        loop {
            let reply = self
                .model
                .invoke(&self.request(transcript))
                .await?
                .with_name(self.name.clone());
            transcript.push(reply.clone());
            updates.emit(TranscriptUpdate::nested(
                &self.name,
                MODEL_NODE,
                vec![reply.clone()],
            ));

            if !reply.has_tool_calls() {
                break;
            }
            if rounds == self.max_tool_rounds {
                return Err(AgentError::ToolLoopLimit {
                    agent: self.name.clone(),
                    rounds,
                });
            }

            let results = self.run_tools(&reply).await;
            transcript.extend(results.iter().cloned());
            updates.emit(TranscriptUpdate::nested(&self.name, TOOLS_NODE, results));
            rounds += 1;
        }

        let appended = transcript.len() - mark;
        info!(
            agent = %self.name,
            tool_rounds = rounds,
            appended,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Specialist finished"
        );
        Ok(appended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{stub_descriptor, ScriptedModel, StubTool};
    use serde_json::json;
    use stockdesk_models::{Role, ToolCall};

    fn tool_call(id: &str, name: &str) -> Message {
        Message::assistant("").with_tool_calls(vec![ToolCall::new(id, name, json!({"query": "KO"}))])
    }

    #[tokio::test]
    async fn answer_without_tools_appends_one_message() {
        let model = Arc::new(ScriptedModel::new(vec![Message::assistant("KO and JPM look promising")]));
        let agent = ReactSpecialist::new("stock_finder_agent", "Find stocks", model.clone(), Arc::new(ToolSet::empty()));
        let mut transcript = Transcript::new("Give me good stock recommendation from NYSE");

        let appended = agent.act(&mut transcript, &UpdateSink::disabled()).await.unwrap();

        assert_eq!(appended, 1);
        let last = transcript.last().unwrap();
        assert_eq!(last.name.as_deref(), Some("stock_finder_agent"));
        assert_eq!(last.content, "KO and JPM look promising");

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].system.as_deref(), Some("Find stocks"));
        assert!(requests[0].tools.is_empty());
    }

    #[tokio::test]
    async fn tool_round_trip_then_final_answer() {
        let model = Arc::new(ScriptedModel::new(vec![
            tool_call("call_1", "search_engine"),
            Message::assistant("KO trades at 62.10"),
        ]));
        let search = Arc::new(StubTool::replying("Coca-Cola 62.10 USD"));
        let tools = Arc::new(ToolSet::from_descriptors(vec![stub_descriptor("search_engine", search.clone())]));
        let agent = ReactSpecialist::new("market_data_agent", "Fetch prices", model.clone(), tools);
        let (sink, mut rx) = UpdateSink::channel();
        let mut transcript = Transcript::new("q");

        let appended = agent.act(&mut transcript, &sink).await.unwrap();

        assert_eq!(appended, 3);
        let added = transcript.since(1);
        assert_eq!(added[1].role, Role::Tool);
        assert_eq!(added[1].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(added[1].content, "Coca-Cola 62.10 USD");
        assert_eq!(search.calls()[0].1, json!({"query": "KO"}));

        // The second model call saw the tool result.
        assert_eq!(model.requests()[1].messages.len(), 3);
        assert_eq!(model.requests()[1].tools[0].name, "search_engine");

        drop(sink);
        let mut nodes = Vec::new();
        while let Some(update) = rx.recv().await {
            assert_eq!(update.namespace.as_deref(), Some("market_data_agent"));
            nodes.push(update.node);
        }
        assert_eq!(nodes, vec!["agent", "tools", "agent"]);
    }

    #[tokio::test]
    async fn tool_errors_become_error_messages() {
        let model = Arc::new(ScriptedModel::new(vec![
            tool_call("call_1", "get_quote"),
            Message::assistant("Could not fetch the quote"),
        ]));
        let agent = ReactSpecialist::new("market_data_agent", "p", model, Arc::new(ToolSet::empty()));
        let mut transcript = Transcript::new("q");

        agent.act(&mut transcript, &UpdateSink::disabled()).await.unwrap();

        let error = &transcript.messages()[2];
        assert!(error.is_error);
        assert_eq!(error.content, "Error: unknown tool: get_quote");
        assert_eq!(transcript.last().unwrap().content, "Could not fetch the quote");
    }

    #[tokio::test]
    async fn runaway_tool_loop_is_bounded() {
        let model = Arc::new(ScriptedModel::new(vec![
            tool_call("call_1", "search_engine"),
            tool_call("call_2", "search_engine"),
            tool_call("call_3", "search_engine"),
        ]));
        let tools = Arc::new(ToolSet::from_descriptors(vec![stub_descriptor(
            "search_engine",
            Arc::new(StubTool::replying("more")),
        )]));
        let agent = ReactSpecialist::new("news_analyst_agent", "p", model, tools).with_max_tool_rounds(2);
        let mut transcript = Transcript::new("q");

        let err = agent.act(&mut transcript, &UpdateSink::disabled()).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolLoopLimit { rounds: 2, .. }));
    }

    #[tokio::test]
    async fn model_errors_propagate() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let agent = ReactSpecialist::new("price_recommender_agent", "p", model, Arc::new(ToolSet::empty()));
        let mut transcript = Transcript::new("q");

        let err = agent.act(&mut transcript, &UpdateSink::disabled()).await.unwrap_err();
        assert!(matches!(err, AgentError::Model { .. }));
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn from_config_applies_limits() {
        let agent_config = AgentConfig::new("news_analyst_agent", "Summarize news", "news_analyst");
        let mut limits = AgentsConfig::default();
        limits.max_tool_rounds = 3;
        limits.max_tokens = 1024;

        let agent = ReactSpecialist::from_config(
            &agent_config,
            &limits,
            "You are a financial news analyst.",
            Arc::new(ScriptedModel::new(vec![])),
            Arc::new(ToolSet::empty()),
        );
        assert_eq!(agent.name(), "news_analyst_agent");
        assert_eq!(agent.description(), "Summarize news");
        assert_eq!(agent.max_tool_rounds, 3);
        assert_eq!(agent.max_tokens, 1024);
    }
}
