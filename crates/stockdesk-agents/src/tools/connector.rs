//! Startup connection to every configured tool server.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};
use stockdesk_models::{ToolServerConfig, ToolSpec, TransportKind};
use tracing::{info, warn};

use super::client::McpClient;
use super::transport::{HttpTransport, McpTransport, StdioTransport};
use super::types::McpTool;
use super::McpError;
use crate::env::Env;

/// Something that can execute a named tool. Returns the text result.
#[async_trait]
pub trait ToolHandle: Send + Sync {
    async fn invoke(&self, name: &str, arguments: Value) -> Result<String, McpError>;
}

#[async_trait]
impl ToolHandle for McpClient {
    async fn invoke(&self, name: &str, arguments: Value) -> Result<String, McpError> {
        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(McpError::protocol(format!(
                    "arguments for {name} must be a JSON object, got {other}"
                )))
            }
        };

        let result = self.call_tool(name, arguments).await?;
        if result.is_error {
            return Err(McpError::ToolFailed {
                name: name.to_string(),
                message: result.text(),
            });
        }
        Ok(result.text())
    }
}

/// A tool the agents may call: its advertised spec, the server that owns it
/// and the handle that executes it.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub spec: ToolSpec,
    pub server: String,
    pub handle: Arc<dyn ToolHandle>,
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("spec", &self.spec)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

/// Tools gathered at startup. Shared read-only by every specialist and
/// released with [`ToolSet::shutdown`].
#[derive(Default)]
pub struct ToolSet {
    descriptors: Vec<ToolDescriptor>,
    names: HashSet<String>,
    clients: Vec<(String, Arc<McpClient>)>,
}

impl ToolSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a set from ready-made descriptors. The first of any duplicate
    /// name wins.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ToolDescriptor>) -> Self {
        let mut set = Self::default();
        for descriptor in descriptors {
            set.register(descriptor);
        }
        set
    }

    fn register(&mut self, descriptor: ToolDescriptor) -> bool {
        if !self.names.insert(descriptor.spec.name.clone()) {
            warn!(
                tool = %descriptor.spec.name,
                server = %descriptor.server,
                "Duplicate tool name, keeping the first registration"
            );
            return false;
        }
        self.descriptors.push(descriptor);
        true
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.descriptors.iter().map(|d| d.spec.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.descriptors.iter().find(|d| d.spec.name == name)
    }

    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<String, McpError> {
        let descriptor = self.get(name).ok_or_else(|| McpError::UnknownTool {
            name: name.to_string(),
        })?;
        descriptor.handle.invoke(name, arguments).await
    }

    /// Close every server connection; spawned processes are killed.
    pub async fn shutdown(&self) {
        for (server, client) in &self.clients {
            if let Err(e) = client.close().await {
                warn!(server = %server, error = %e, "Failed to close tool server");
            }
        }
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("descriptors", &self.descriptors)
            .field("servers", &self.clients.len())
            .finish()
    }
}

pub struct ToolConnector {
    request_timeout: Duration,
}

impl ToolConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    /// Connect to every enabled server. A server that cannot be reached
    /// contributes nothing; if none can, the set is empty.
    pub async fn connect(&self, servers: &[ToolServerConfig], env: &dyn Env) -> ToolSet {
        let mut set = ToolSet::empty();

        for server in servers.iter().filter(|s| s.enabled) {
            let start = Instant::now();
            match self.connect_server(server, env).await {
                Ok((client, tools)) => {
                    let client = Arc::new(client);
                    let handle: Arc<dyn ToolHandle> = client.clone();
                    let mut added = 0;
                    for tool in tools {
                        let descriptor = ToolDescriptor {
                            spec: ToolSpec::from(tool),
                            server: server.name.clone(),
                            handle: Arc::clone(&handle),
                        };
                        if set.register(descriptor) {
                            added += 1;
                        }
                    }
                    set.clients.push((server.name.clone(), client));
                    info!(
                        server = %server.name,
                        tools = added,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Tool server connected"
                    );
                }
                Err(e) => {
                    warn!(server = %server.name, error = %e, "Tool server unavailable, continuing without its tools");
                }
            }
        }

        if set.is_empty() {
            warn!("No tools available; agents will answer from model knowledge only");
        }
        set
    }

    async fn connect_server(
        &self,
        server: &ToolServerConfig,
        env: &dyn Env,
    ) -> Result<(McpClient, Vec<McpTool>), McpError> {
        let vars = resolve_env(server, env)?;
        let transport: Box<dyn McpTransport> = match server.transport {
            TransportKind::Stdio => {
                if server.command.trim().is_empty() {
                    return Err(McpError::connection("no command configured"));
                }
                Box::new(StdioTransport::spawn(
                    &server.command,
                    &server.args,
                    &vars,
                    self.request_timeout,
                )?)
            }
            TransportKind::Http => {
                let url = server
                    .url
                    .as_deref()
                    .ok_or_else(|| McpError::connection("no url configured"))?;
                Box::new(HttpTransport::new(url, vars, self.request_timeout)?)
            }
        };

        let client = McpClient::new(transport);
        let handshake = async {
            client.initialize().await?;
            client.list_tools().await
        }
        .await;
        match handshake {
            Ok(tools) => Ok((client, tools)),
            Err(e) => {
                let _ = client.close().await;
                Err(e)
            }
        }
    }
}

/// Literal `env` entries plus `env_from` lookups. A referenced variable
/// that is unset and has no default fails the server.
pub fn resolve_env(
    server: &ToolServerConfig,
    env: &dyn Env,
) -> Result<BTreeMap<String, String>, McpError> {
    let mut vars = server.env.clone();
    for (key, reference) in &server.env_from {
        let value = env
            .non_empty(&reference.var)
            .or_else(|| reference.default.clone())
            .ok_or_else(|| {
                McpError::connection(format!("environment variable {} is not set", reference.var))
            })?;
        vars.insert(key.clone(), value);
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubTool;
    use serde_json::json;

    fn descriptor(name: &str, server: &str, reply: &str) -> ToolDescriptor {
        ToolDescriptor {
            spec: ToolSpec::new(name, format!("{name} on {server}")),
            server: server.to_string(),
            handle: Arc::new(StubTool::replying(reply)),
        }
    }

    #[test]
    fn bright_data_env_uses_defaults_and_token() {
        let mut env = BTreeMap::new();
        env.insert("BRIGHT_DATA_API_TOKEN".to_string(), "bd-token".to_string());

        let vars = resolve_env(&ToolServerConfig::bright_data(), &env).unwrap();
        assert_eq!(vars["API_TOKEN"], "bd-token");
        assert_eq!(vars["WEB_UNLOCKER_ZONE"], "unblocker");
        assert_eq!(vars["BROWSER_ZONE"], "scraping_browser");
    }

    #[test]
    fn missing_token_fails_the_server() {
        let err = resolve_env(&ToolServerConfig::bright_data(), &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("BRIGHT_DATA_API_TOKEN"));
    }

    #[test]
    fn duplicate_names_keep_first_registration() {
        let set = ToolSet::from_descriptors(vec![
            descriptor("search_engine", "bright_data", "first"),
            descriptor("search_engine", "backup", "second"),
            descriptor("scrape_as_markdown", "bright_data", "page"),
        ]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("search_engine").unwrap().server, "bright_data");
    }

    #[tokio::test]
    async fn invoke_routes_by_name() {
        let set = ToolSet::from_descriptors(vec![descriptor("search_engine", "bright_data", "KO up 2%")]);
        assert_eq!(set.invoke("search_engine", json!({"query": "KO"})).await.unwrap(), "KO up 2%");

        let err = set.invoke("get_quote", json!({})).await.unwrap_err();
        assert_eq!(err, McpError::UnknownTool { name: "get_quote".into() });
    }

    #[tokio::test]
    async fn unreachable_servers_yield_empty_set() {
        let mut env = BTreeMap::new();
        env.insert("BRIGHT_DATA_API_TOKEN".to_string(), "bd-token".to_string());

        let mut missing = ToolServerConfig::bright_data();
        missing.command = "stockdesk-no-such-command".to_string();
        let mut http = ToolServerConfig::bright_data();
        http.name = "remote".to_string();
        http.transport = TransportKind::Http;
        http.url = Some("http://127.0.0.1:9/mcp".to_string());
        let mut disabled = ToolServerConfig::bright_data();
        disabled.enabled = false;

        let set = ToolConnector::new(Duration::from_secs(2))
            .connect(&[missing, http, disabled], &env)
            .await;
        assert!(set.is_empty());
        assert!(set.specs().is_empty());
        set.shutdown().await;
    }
}
