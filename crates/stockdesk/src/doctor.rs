//! Environment checks behind `stockdesk doctor`.

use std::fmt::Write as _;
use std::path::Path;

use console::style;
use stockdesk_agents::llm::resolver::api_key_var;
use stockdesk_agents::llm::ProviderFactory;
use stockdesk_agents::tools::connector::resolve_env;
use stockdesk_agents::Env;
use stockdesk_models::{DeskConfig, ProviderKind, ToolServerConfig, TransportKind};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCheck {
    pub kind: ProviderKind,
    pub model: String,
    /// Why the backend cannot be built, if it cannot.
    pub problem: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolServerCheck {
    pub name: String,
    pub enabled: bool,
    pub problems: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorReport {
    pub providers: Vec<ProviderCheck>,
    pub tool_servers: Vec<ToolServerCheck>,
}

impl DoctorReport {
    pub fn usable_providers(&self) -> Vec<&ProviderCheck> {
        self.providers.iter().filter(|p| p.problem.is_none()).collect()
    }

    /// True when at least one provider builds. Tool problems only degrade.
    pub fn is_ready(&self) -> bool {
        !self.usable_providers().is_empty()
    }

    pub fn render(&self, styled: bool) -> String {
        let ok = |text: &str| mark(styled, true, text);
        let bad = |text: &str| mark(styled, false, text);
        let mut out = String::new();

        let _ = writeln!(out, "Model providers (in fallback order):");
        for check in &self.providers {
            let label = format!("{}:{}", check.kind, check.model);
            match &check.problem {
                None => {
                    let _ = writeln!(out, "  {}", ok(&label));
                }
                Some(problem) => {
                    let _ = writeln!(out, "  {} ({problem})", bad(&label));
                }
            }
        }

        let _ = writeln!(out, "\nTool servers:");
        for check in &self.tool_servers {
            if !check.enabled {
                let _ = writeln!(out, "  - {} (disabled)", check.name);
            } else if check.problems.is_empty() {
                let _ = writeln!(out, "  {}", ok(&check.name));
            } else {
                let _ = writeln!(out, "  {}", bad(&check.name));
                for problem in &check.problems {
                    let _ = writeln!(out, "      {problem}");
                }
            }
        }

        let _ = writeln!(out);
        if self.is_ready() {
            let names: Vec<String> = self
                .usable_providers()
                .iter()
                .map(|p| p.kind.to_string())
                .collect();
            let _ = writeln!(out, "Ready to use with: {}", names.join(", "));
            if self.tool_servers.iter().any(|t| t.enabled && !t.problems.is_empty()) {
                let _ = writeln!(out, "Some tool servers are unavailable; agents will run with limited tools.");
            }
        } else {
            let _ = writeln!(out, "No LLM providers available. Set up at least one of:");
            let _ = writeln!(out, "  - Anthropic: https://console.anthropic.com/");
            let _ = writeln!(out, "  - Ollama (local): https://ollama.ai/");
            let _ = writeln!(out, "  - OpenAI: https://platform.openai.com/");
        }
        out
    }
}

fn mark(styled: bool, good: bool, text: &str) -> String {
    let symbol = if good { "✓" } else { "✗" };
    let line = format!("{symbol} {text}");
    match (styled, good) {
        (false, _) => line,
        (true, true) => style(line).green().to_string(),
        (true, false) => style(line).red().to_string(),
    }
}

/// Build every configured provider (not just the first that works) and
/// inspect every tool server without starting it.
pub async fn diagnose(config: &DeskConfig, factory: &dyn ProviderFactory, env: &dyn Env) -> DoctorReport {
    let mut providers = Vec::with_capacity(config.providers.len());
    for candidate in &config.providers {
        let problem = factory.build(candidate, env).await.err().map(|e| e.to_string());
        debug!(provider = %candidate.kind, ok = problem.is_none(), "Checked provider");
        providers.push(ProviderCheck {
            kind: candidate.kind,
            model: candidate.model.clone(),
            problem,
        });
    }

    let tool_servers = config
        .tools
        .servers
        .iter()
        .map(|server| check_tool_server(server, env, |cmd| which::which(cmd).is_ok()))
        .collect();

    DoctorReport {
        providers,
        tool_servers,
    }
}

fn check_tool_server(
    server: &ToolServerConfig,
    env: &dyn Env,
    on_path: impl Fn(&str) -> bool,
) -> ToolServerCheck {
    let mut problems = Vec::new();
    match server.transport {
        TransportKind::Stdio => {
            if server.command.is_empty() {
                problems.push("no command configured".to_string());
            } else if !on_path(&server.command) {
                problems.push(format!("`{}` not found on PATH", server.command));
            }
        }
        TransportKind::Http => {
            if server.url.as_deref().map_or(true, str::is_empty) {
                problems.push("no url configured".to_string());
            }
        }
    }
    if let Err(e) = resolve_env(server, env) {
        problems.push(e.to_string());
    }

    ToolServerCheck {
        name: server.name.clone(),
        enabled: server.enabled,
        problems,
    }
}

/// A `.env` skeleton naming every variable the config reads.
pub fn env_template(config: &DeskConfig) -> String {
    let mut out = String::from("# Model providers (set at least one)\n");
    for provider in &config.providers {
        match api_key_var(provider) {
            Some(var) => {
                let _ = writeln!(out, "{var}=");
            }
            None => {
                let _ = writeln!(out, "# {} runs locally; no key needed", provider.kind);
            }
        }
    }

    for server in config.tools.servers.iter().filter(|s| !s.env_from.is_empty()) {
        let _ = writeln!(out, "\n# Tool server: {}", server.name);
        for reference in server.env_from.values() {
            let _ = writeln!(
                out,
                "{}={}",
                reference.var,
                reference.default.as_deref().unwrap_or("")
            );
        }
    }
    out
}

pub fn write_env_template(config: &DeskConfig, path: &Path) -> std::io::Result<()> {
    std::fs::write(path, env_template(config))
}
