pub mod env;
pub mod error;
pub mod llm;
pub mod parser;
pub mod printer;
pub mod prompts;
pub mod router;
pub mod specialist;
pub mod supervisor;
pub mod tools;

pub mod test_support;

pub use env::{Env, ProcessEnv};
pub use error::AgentError;
pub use llm::{ChatModel, ChatRequest, ModelInfo};
pub use printer::{TranscriptPrinter, UpdateSink};
pub use prompts::PromptLoader;
pub use router::{LlmRouter, RosterEntry, RouteDecision, Router};
pub use specialist::{ReactSpecialist, SpecialistAgent};
pub use supervisor::{RunFailure, RunReport, Supervisor, SupervisorState};
pub use tools::{McpError, ToolConnector, ToolDescriptor, ToolHandle, ToolSet};
