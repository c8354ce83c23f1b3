//! Test doubles for running the supervisor without a network.
//!
//! `ScriptedModel` replays canned replies and records every request,
//! `ScriptedRouter` replays routing decisions, `StubTool` answers tool calls
//! with fixed text, and `EchoSpecialist` appends one fixed answer per turn.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use stockdesk_models::{Message, ToolSpec, Transcript};

use crate::error::AgentError;
use crate::llm::{ChatModel, ChatRequest, ModelInfo};
use crate::printer::UpdateSink;
use crate::router::{RosterEntry, RouteDecision, Router};
use crate::specialist::SpecialistAgent;
use crate::tools::{McpError, ToolDescriptor, ToolHandle};

/// A chat model that returns queued replies in order. Once the queue is
/// empty every call fails with a model error.
pub struct ScriptedModel {
    info: ModelInfo,
    replies: Mutex<VecDeque<Result<Message, String>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Message>) -> Self {
        let model = Self::named("scripted", "test");
        model
            .replies
            .lock()
            .unwrap()
            .extend(replies.into_iter().map(Ok));
        model
    }

    pub fn named(provider: &str, model: &str) -> Self {
        Self {
            info: ModelInfo {
                provider: provider.to_string(),
                model: model.to_string(),
            },
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: Message) {
        self.replies.lock().unwrap().push_back(Ok(reply));
    }

    /// Queue a failure (e.g. a rejected API key) at this point in the script.
    pub fn push_error(&self, message: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn info(&self) -> ModelInfo {
        self.info.clone()
    }

    async fn invoke(&self, request: &ChatRequest) -> Result<Message, AgentError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(AgentError::model(&self.info.provider, message)),
            None => Err(AgentError::model(&self.info.provider, "script exhausted")),
        }
    }
}

/// A router that replays decisions, then says `Done` with no summary.
pub struct ScriptedRouter {
    decisions: Mutex<VecDeque<RouteDecision>>,
    seen: Mutex<Vec<usize>>,
}

impl ScriptedRouter {
    pub fn new(decisions: Vec<RouteDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Shorthand: delegate to each agent in order, then finish.
    pub fn sequence(agents: &[&str]) -> Self {
        Self::new(
            agents
                .iter()
                .map(|a| RouteDecision::Delegate {
                    agent: a.to_string(),
                })
                .collect(),
        )
    }

    /// Transcript length at each consultation.
    pub fn seen(&self) -> Vec<usize> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Router for ScriptedRouter {
    async fn choose_next(
        &self,
        transcript: &Transcript,
        _roster: &[RosterEntry],
    ) -> Result<RouteDecision, AgentError> {
        self.seen.lock().unwrap().push(transcript.len());
        Ok(self
            .decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RouteDecision::Done { summary: None }))
    }
}

/// A tool handle with a fixed outcome that records its calls.
pub struct StubTool {
    outcome: Result<String, String>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl StubTool {
    pub fn replying(text: &str) -> Self {
        Self {
            outcome: Ok(text.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fails every call as a tool reporting `isError`.
    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolHandle for StubTool {
    async fn invoke(&self, name: &str, arguments: Value) -> Result<String, McpError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        self.outcome.clone().map_err(|message| McpError::ToolFailed {
            name: name.to_string(),
            message,
        })
    }
}

/// Wrap a stub as a descriptor owned by a `stub` server.
pub fn stub_descriptor(name: &str, handle: Arc<StubTool>) -> ToolDescriptor {
    ToolDescriptor {
        spec: ToolSpec::new(name, format!("Stub {name}")),
        server: "stub".to_string(),
        handle,
    }
}

/// A specialist that appends one fixed answer and records the transcript
/// length it was handed on each turn.
pub struct EchoSpecialist {
    name: String,
    reply: String,
    turns: Mutex<Vec<usize>>,
}

impl EchoSpecialist {
    pub fn new(name: &str, reply: &str) -> Self {
        Self {
            name: name.to_string(),
            reply: reply.to_string(),
            turns: Mutex::new(Vec::new()),
        }
    }

    pub fn turns(&self) -> Vec<usize> {
        self.turns.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpecialistAgent for EchoSpecialist {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echoes a fixed answer"
    }

    async fn act(
        &self,
        transcript: &mut Transcript,
        _updates: &UpdateSink,
    ) -> Result<usize, AgentError> {
        self.turns.lock().unwrap().push(transcript.len());
        transcript.push(Message::assistant(self.reply.clone()).with_name(self.name.clone()));
        Ok(1)
    }
}
