//! stockdesk - a supervised desk of stock research agents
//!
//! A supervisor routes one query through a roster of specialist agents
//! (stock finder, market data, news analyst, price recommender) that share
//! one transcript and may call tools from an MCP server.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use stockdesk::agents::UpdateSink;
//! use stockdesk::models::DeskConfig;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let desk = stockdesk::build_desk(&DeskConfig::default()).await?;
//! let report = desk.run("Give me good stock recommendation from NYSE", &UpdateSink::disabled()).await?;
//! println!("{}", report.final_answer().map(|m| m.content.as_str()).unwrap_or(""));
//! desk.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub use stockdesk_agents as agents;
pub use stockdesk_models as models;

pub mod doctor;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use stockdesk_agents::llm::{resolve, HttpProviderFactory, ProviderAttempt, ProviderFactory};
use stockdesk_agents::prompts::direct_analysis_prompt;
use stockdesk_agents::{
    AgentError, ChatModel, ChatRequest, Env, LlmRouter, ModelInfo, ProcessEnv, PromptLoader,
    ReactSpecialist, RunFailure, RunReport, SpecialistAgent, Supervisor, ToolConnector, ToolSet,
    UpdateSink,
};
use stockdesk_models::{DeskConfig, Message};
use tracing::info;

/// Default query for `direct` mode and the library examples.
pub const DEFAULT_QUERY: &str = "Give me good stock recommendation from NYSE";

/// A ready-to-run desk: the resolved model, the connected tools and the
/// supervisor wired over both.
pub struct Desk {
    supervisor: Supervisor,
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolSet>,
    attempts: Vec<ProviderAttempt>,
}

impl Desk {
    pub fn model_info(&self) -> ModelInfo {
        self.model.info()
    }

    /// Every provider tried while resolving, ending with the selected one.
    pub fn attempts(&self) -> &[ProviderAttempt] {
        &self.attempts
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub async fn run(&self, query: &str, updates: &UpdateSink) -> Result<RunReport, RunFailure> {
        self.supervisor.run(query, updates).await
    }

    /// Close every tool server connection.
    pub async fn shutdown(self) {
        self.tools.shutdown().await;
    }
}

/// Build a desk against the real process environment and HTTP backends.
pub async fn build_desk(config: &DeskConfig) -> Result<Desk, AgentError> {
    let factory = HttpProviderFactory::new(Duration::from_secs(config.request_timeout_secs))?;
    let connector = ToolConnector::new(Duration::from_secs(config.tools.request_timeout_secs));
    build_desk_with(config, &factory, &ProcessEnv, &connector).await
}

/// Build a desk from explicit collaborators. The model is resolved before
/// any tool server is started, so a missing provider never spawns processes.
pub async fn build_desk_with(
    config: &DeskConfig,
    factory: &dyn ProviderFactory,
    env: &dyn Env,
    connector: &ToolConnector,
) -> Result<Desk, AgentError> {
    let resolution = resolve(&config.providers, factory, env).await?;
    let tools = Arc::new(connector.connect(&config.tools.servers, env).await);
    info!(
        model = %resolution.model.info(),
        tools = tools.len(),
        "Desk resources ready"
    );

    let supervisor = assemble(config, resolution.model.clone(), tools.clone());
    Ok(Desk {
        supervisor,
        model: resolution.model,
        tools,
        attempts: resolution.attempts,
    })
}

/// Wire the enabled specialists and the model-backed router.
pub fn assemble(config: &DeskConfig, model: Arc<dyn ChatModel>, tools: Arc<ToolSet>) -> Supervisor {
    let prompts = PromptLoader::new(&config.prompts_dir);

    let specialists: Vec<Arc<dyn SpecialistAgent>> = config
        .agents
        .specialists
        .iter()
        .filter(|s| s.enabled)
        .map(|s| {
            Arc::new(ReactSpecialist::from_config(
                s,
                &config.agents,
                prompts.load(&s.prompt),
                model.clone(),
                tools.clone(),
            )) as Arc<dyn SpecialistAgent>
        })
        .collect();

    let router = LlmRouter::new(model, prompts.load(&config.supervisor.prompt));
    Supervisor::new(specialists, Arc::new(router), config.supervisor.clone())
}

/// One model call, no agents and no tools.
pub async fn direct_analysis(
    model: &dyn ChatModel,
    query: &str,
    config: &DeskConfig,
) -> Result<Message, AgentError> {
    let request = ChatRequest {
        messages: vec![Message::user(direct_analysis_prompt(query))],
        max_tokens: config.agents.max_tokens,
        ..ChatRequest::default()
    }
    .with_temperature(config.agents.temperature);

    info!(model = %model.info(), "Requesting direct analysis");
    model.invoke(&request).await
}

/// Resolve the provider chain only, for modes that need no tools.
pub async fn resolve_model(config: &DeskConfig) -> Result<Arc<dyn ChatModel>, AgentError> {
    let factory = HttpProviderFactory::new(Duration::from_secs(config.request_timeout_secs))?;
    Ok(resolve(&config.providers, &factory, &ProcessEnv).await?.model)
}

/// Read the TOML config at `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> anyhow::Result<DeskConfig> {
    if !path.exists() {
        info!(path = %path.display(), "No config file, using defaults");
        return Ok(DeskConfig::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Failed to parse config: {}", path.display()))
}

/// Setup advice for errors a user can fix.
pub fn hint(error: &AgentError) -> Option<&'static str> {
    match error {
        AgentError::NoProvider(_) => Some(
            "Set up at least one model provider:\n\
             \x20 - Anthropic: set ANTHROPIC_API_KEY (https://console.anthropic.com/)\n\
             \x20 - Ollama: install from https://ollama.ai/ and run `ollama pull llama3.2`\n\
             \x20 - OpenAI: set OPENAI_API_KEY\n\
             Run `stockdesk doctor` to check your environment.",
        ),
        AgentError::Model { .. } => Some(
            "Troubleshooting:\n\
             \x20 1. Check that your API keys are valid\n\
             \x20 2. If using Ollama, make sure it is running (`ollama serve`)\n\
             \x20 3. Check your internet connection",
        ),
        _ => None,
    }
}
