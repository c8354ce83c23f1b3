use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration for stockdesk.
///
/// Every section has defaults, so an empty file (or no file at all) yields
/// the stock-recommendation desk with the standard provider chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeskConfig {
    /// Directory holding `<role>_prompt.txt` files.
    pub prompts_dir: String,
    /// Timeout for a single model HTTP call, in seconds.
    pub request_timeout_secs: u64,
    /// Model backends in priority order. The first one that builds wins.
    pub providers: Vec<ProviderConfig>,
    pub tools: ToolsConfig,
    pub agents: AgentsConfig,
    pub supervisor: SupervisorConfig,
    pub output: OutputConfig,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            prompts_dir: "prompts".to_string(),
            request_timeout_secs: 120,
            providers: default_providers(),
            tools: ToolsConfig::default(),
            agents: AgentsConfig::default(),
            supervisor: SupervisorConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    Ollama,
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAi => "openai",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate in the model fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    /// Environment variable holding the API key. Required for hosted kinds.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Fixed endpoint override.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable that may override the endpoint.
    #[serde(default)]
    pub base_url_env: Option<String>,
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            kind: ProviderKind::Anthropic,
            model: "claude-3-haiku-20240307".to_string(),
            api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
            base_url: None,
            base_url_env: Some("ANTHROPIC_BASE_URL".to_string()),
        },
        ProviderConfig {
            kind: ProviderKind::Ollama,
            model: "llama3.2".to_string(),
            api_key_env: None,
            base_url: None,
            base_url_env: Some("OLLAMA_BASE_URL".to_string()),
        },
        ProviderConfig {
            kind: ProviderKind::OpenAi,
            model: "gpt-4o-mini".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            base_url: None,
            base_url_env: Some("OPENAI_BASE_URL".to_string()),
        },
    ]
}

/// External tool servers and how to reach them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Timeout for one JSON-RPC request to a tool server, in seconds.
    pub request_timeout_secs: u64,
    pub servers: Vec<ToolServerConfig>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            servers: vec![ToolServerConfig::bright_data()],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Http,
}

/// Reference to an environment variable, with an optional fallback value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvRef {
    pub var: String,
    #[serde(default)]
    pub default: Option<String>,
}

/// A single tool provider process or endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolServerConfig {
    pub name: String,
    #[serde(default)]
    pub transport: TransportKind,
    /// Executable for the stdio transport.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Endpoint for the http transport.
    #[serde(default)]
    pub url: Option<String>,
    /// Literal environment passed to the process (or as headers over http).
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Values pulled from the caller's environment at connect time.
    #[serde(default)]
    pub env_from: BTreeMap<String, EnvRef>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ToolServerConfig {
    /// The Bright Data scraping server, launched through `npx`.
    pub fn bright_data() -> Self {
        let mut env_from = BTreeMap::new();
        env_from.insert(
            "API_TOKEN".to_string(),
            EnvRef {
                var: "BRIGHT_DATA_API_TOKEN".to_string(),
                default: None,
            },
        );
        env_from.insert(
            "WEB_UNLOCKER_ZONE".to_string(),
            EnvRef {
                var: "WEB_UNLOCKER_ZONE".to_string(),
                default: Some("unblocker".to_string()),
            },
        );
        env_from.insert(
            "BROWSER_ZONE".to_string(),
            EnvRef {
                var: "BROWSER_ZONE".to_string(),
                default: Some("scraping_browser".to_string()),
            },
        );

        Self {
            name: "bright_data".to_string(),
            transport: TransportKind::Stdio,
            command: "npx".to_string(),
            args: vec!["@brightdata/mcp".to_string()],
            url: None,
            env: BTreeMap::new(),
            env_from,
            enabled: true,
        }
    }
}

/// Configuration for the specialist agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentsConfig {
    /// Upper bound on model/tool round trips within one delegation.
    pub max_tool_rounds: usize,
    pub temperature: Option<f32>,
    pub max_tokens: u32,
    pub specialists: Vec<AgentConfig>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            temperature: None,
            max_tokens: 2048,
            specialists: vec![
                AgentConfig::new(
                    "stock_finder_agent",
                    "Assign research-related tasks to this agent and pick 2 promising NYSE stocks",
                    "stock_finder",
                ),
                AgentConfig::new(
                    "market_data_agent",
                    "Assign tasks to fetch current market data (price, volume, trends)",
                    "market_data",
                ),
                AgentConfig::new(
                    "news_analyst_agent",
                    "Assign task to search and summarize recent news",
                    "news_analyst",
                ),
                AgentConfig::new(
                    "price_recommender_agent",
                    "Assign task to give buy/sell decision with target price",
                    "price_recommender",
                ),
            ],
        }
    }
}

/// Configuration for a single specialist agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// Unique agent name, used for routing and message authorship.
    pub name: String,
    /// Shown to the supervisor in its roster.
    #[serde(default)]
    pub description: String,
    /// Prompt role, resolved to `<prompts_dir>/<prompt>_prompt.txt`.
    pub prompt: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl AgentConfig {
    pub fn new(name: &str, description: &str, prompt: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            prompt: prompt.to_string(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Prompt role for the routing model.
    pub prompt: String,
    /// Insert hand-off records around each delegation.
    pub show_handoffs: bool,
    /// Hard stop for runaway routing.
    pub max_delegations: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            prompt: "supervisor".to_string(),
            show_handoffs: true,
            max_delegations: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Print only the last message of each update.
    pub last_message: bool,
    /// Stream the inner model/tool steps of each specialist.
    pub show_subgraphs: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            last_message: true,
            show_subgraphs: true,
        }
    }
}

fn default_true() -> bool {
    true
}
