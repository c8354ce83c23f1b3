//! MCP transports: a spawned child process over stdio, or JSON-RPC over HTTP POST.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use super::McpError;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for the response with the same id.
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError>;

    /// Fire-and-forget; no response is awaited.
    async fn notify(&self, notification: JsonRpcNotification) -> Result<(), McpError>;

    async fn close(&self) -> Result<(), McpError>;
}

/// Newline-delimited JSON over the stdin/stdout of a child process. A
/// background task reads stdout and hands each response to its waiter.
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    pending: Pending,
    child: Mutex<Child>,
    closed: AtomicBool,
    timeout: Duration,
    _reader: tokio::task::JoinHandle<()>,
}

impl StdioTransport {
    pub fn new(mut child: Child, timeout: Duration) -> Result<Self, McpError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::connection("child process stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::connection("child process stdout not captured"))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = Arc::clone(&pending);

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match classify_line(&line) {
                    Inbound::Response(resp) => match resp.id {
                        Some(id) => {
                            if let Some(waiter) = reader_pending.lock().await.remove(&id) {
                                let _ = waiter.send(resp);
                            }
                        }
                        None => debug!("Ignoring response without id"),
                    },
                    Inbound::ServerMessage(method) => {
                        debug!(method = %method, "Ignoring server-initiated message")
                    }
                    Inbound::Invalid(e) => warn!(error = %e, "Failed to parse MCP response line"),
                }
            }
            // Server exited: wake every waiter with a closed channel.
            reader_pending.lock().await.clear();
        });

        Ok(Self {
            stdin: Mutex::new(stdin),
            pending,
            child: Mutex::new(child),
            closed: AtomicBool::new(false),
            timeout,
            _reader: reader,
        })
    }

    /// Spawn `command args` with `env` added to the inherited environment.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        let child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                McpError::connection(format!("failed to spawn MCP server process `{command}`: {e}"))
            })?;

        Self::new(child, timeout)
    }

    async fn write_line(&self, payload: &impl serde::Serialize) -> Result<(), McpError> {
        let mut line = serde_json::to_string(payload)
            .map_err(|e| McpError::protocol(format!("failed to serialize request: {e}")))?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::connection(format!("failed to write to stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::connection(format!("failed to flush stdin: {e}")))
    }

    fn ensure_open(&self) -> Result<(), McpError> {
        if self.closed.load(Ordering::Relaxed) {
            Err(McpError::connection("transport closed"))
        } else {
            Ok(())
        }
    }
}

/// One line read from a server's stdout.
#[derive(Debug)]
enum Inbound {
    Response(JsonRpcResponse),
    /// A request or notification from the server; never a reply to ours.
    ServerMessage(String),
    Invalid(String),
}

fn classify_line(line: &str) -> Inbound {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => return Inbound::Invalid(e.to_string()),
    };
    if let Some(method) = value.get("method") {
        return Inbound::ServerMessage(method.as_str().unwrap_or_default().to_string());
    }
    match serde_json::from_value(value) {
        Ok(resp) => Inbound::Response(resp),
        Err(e) => Inbound::Invalid(e.to_string()),
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        self.ensure_open()?;

        let id = request.id;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.write_line(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(McpError::connection("server closed before responding")),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::Timeout {
                    elapsed_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<(), McpError> {
        self.ensure_open()?;
        self.write_line(&notification).await
    }

    async fn close(&self) -> Result<(), McpError> {
        self.closed.store(true, Ordering::Relaxed);
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
        Ok(())
    }
}

/// JSON-RPC over plain HTTP POST, one request per call.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    headers: BTreeMap<String, String>,
    closed: AtomicBool,
}

impl HttpTransport {
    pub fn new(
        endpoint: impl Into<String>,
        headers: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| McpError::connection(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            headers,
            closed: AtomicBool::new(false),
        })
    }

    async fn post(&self, body: &impl serde::Serialize) -> Result<reqwest::Response, McpError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(McpError::connection("transport closed"));
        }

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json");
        for (k, v) in &self.headers {
            builder = builder.header(k, v);
        }

        let resp = builder.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                McpError::connection(format!("HTTP request timed out: {e}"))
            } else {
                McpError::connection(format!("HTTP request failed: {e}"))
            }
        })?;

        if !resp.status().is_success() {
            return Err(McpError::connection(format!(
                "HTTP {} from MCP server",
                resp.status()
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let text = self
            .post(&request)
            .await?
            .text()
            .await
            .map_err(|e| McpError::connection(format!("failed to read response body: {e}")))?;

        serde_json::from_str::<JsonRpcResponse>(&text)
            .map_err(|e| McpError::protocol(format!("failed to parse JSON-RPC response: {e}")))
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<(), McpError> {
        self.post(&notification).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), McpError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_fails_for_missing_command() {
        let result = StdioTransport::spawn(
            "stockdesk-no-such-command",
            &[],
            &BTreeMap::new(),
            Duration::from_secs(1),
        );
        match result {
            Err(McpError::Connection { message }) => {
                assert!(message.contains("stockdesk-no-such-command"))
            }
            other => panic!("expected connection error, got {:?}", other.err()),
        }
    }

    #[cfg(unix)]
    fn sh(script: &str, timeout: Duration) -> StdioTransport {
        StdioTransport::spawn("sh", &["-c".to_string(), script.to_string()], &BTreeMap::new(), timeout)
            .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdio_round_trip_and_close() {
        let transport = sh(
            r#"read line; echo '{"jsonrpc":"2.0","id":42,"result":{"ok":true}}'; cat > /dev/null"#,
            Duration::from_secs(5),
        );
        let resp = transport
            .send(JsonRpcRequest::new(42, "ping", None))
            .await
            .unwrap();
        assert_eq!(resp.id, Some(42));
        assert_eq!(resp.result, Some(serde_json::json!({"ok": true})));

        transport.close().await.unwrap();
        let err = transport
            .send(JsonRpcRequest::new(43, "ping", None))
            .await
            .unwrap_err();
        assert_eq!(err, McpError::connection("transport closed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn server_request_with_same_id_is_not_a_reply() {
        // The server pings us with id 7 before answering our request 7.
        let transport = sh(
            r#"read line; echo '{"jsonrpc":"2.0","id":7,"method":"ping"}'; echo '{"jsonrpc":"2.0","id":7,"result":{"tools":[]}}'; cat > /dev/null"#,
            Duration::from_secs(5),
        );
        let resp = transport
            .send(JsonRpcRequest::new(7, "tools/list", None))
            .await
            .unwrap();
        assert_eq!(resp.result, Some(serde_json::json!({"tools": []})));
        transport.close().await.unwrap();
    }

    #[test]
    fn lines_with_a_method_are_server_messages() {
        assert!(matches!(
            classify_line(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#),
            Inbound::ServerMessage(ref m) if m == "ping"
        ));
        assert!(matches!(
            classify_line(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#),
            Inbound::ServerMessage(_)
        ));
        assert!(matches!(
            classify_line(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#),
            Inbound::Response(_)
        ));
        assert!(matches!(classify_line("not json"), Inbound::Invalid(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_server_times_out() {
        let transport = StdioTransport::spawn(
            "sleep",
            &["5".to_string()],
            &BTreeMap::new(),
            Duration::from_millis(100),
        )
        .unwrap();
        let err = transport
            .send(JsonRpcRequest::new(1, "initialize", None))
            .await
            .unwrap_err();
        assert_eq!(err, McpError::Timeout { elapsed_ms: 100 });
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn http_transport_reports_unreachable_endpoint() {
        let transport =
            HttpTransport::new("http://127.0.0.1:9/mcp", BTreeMap::new(), Duration::from_secs(2))
                .unwrap();
        let err = transport
            .send(JsonRpcRequest::new(1, "initialize", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Connection { .. }));
    }
}
