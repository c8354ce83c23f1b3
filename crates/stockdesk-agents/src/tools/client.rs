use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};

use super::transport::McpTransport;
use super::types::*;
use super::McpError;

/// Protocol operations over one transport.
pub struct McpClient {
    transport: Box<dyn McpTransport>,
    next_id: AtomicU64,
}

impl McpClient {
    pub fn new(transport: Box<dyn McpTransport>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    /// `initialize` followed by the `notifications/initialized` notification.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: serde_json::json!({}),
            client_info: Implementation {
                name: "stockdesk".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        let result = self
            .call_method("initialize", Some(serde_json::to_value(&params)?))
            .await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::protocol(format!("failed to parse initialize result: {e}")))?;

        self.transport
            .notify(JsonRpcNotification::new("notifications/initialized"))
            .await?;
        Ok(init)
    }

    /// Every advertised tool, following `nextCursor` until exhausted.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({"cursor": c}));
            let result = self.call_method("tools/list", params).await?;
            let page: ToolsListResult = serde_json::from_value(result).map_err(|e| {
                McpError::protocol(format!("failed to parse tools/list result: {e}"))
            })?;

            tools.extend(page.tools);
            match page.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        Ok(tools)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolsCallResult, McpError> {
        let params = ToolsCallParams {
            name: name.to_string(),
            arguments,
        };
        let result = self
            .call_method("tools/call", Some(serde_json::to_value(&params)?))
            .await?;

        serde_json::from_value(result)
            .map_err(|e| McpError::protocol(format!("failed to parse tools/call result: {e}")))
    }

    pub async fn close(&self) -> Result<(), McpError> {
        self.transport.close().await
    }

    async fn call_method(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .transport
            .send(JsonRpcRequest::new(id, method, params))
            .await?;

        if let Some(error) = response.error {
            return Err(McpError::protocol(format!(
                "JSON-RPC error {}: {}",
                error.code, error.message
            )));
        }
        response
            .result
            .ok_or_else(|| McpError::protocol("JSON-RPC response has neither result nor error"))
    }
}

impl From<serde_json::Error> for McpError {
    fn from(e: serde_json::Error) -> Self {
        McpError::protocol(format!("failed to serialize params: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Replays canned responses and records what was sent.
    #[derive(Default)]
    struct MockTransport {
        responses: Mutex<Vec<JsonRpcResponse>>,
        sent: Arc<Mutex<Vec<JsonRpcRequest>>>,
        notified: Arc<Mutex<Vec<String>>>,
    }

    impl MockTransport {
        fn new(responses: Vec<JsonRpcResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl McpTransport for MockTransport {
        async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
            self.sent.lock().unwrap().push(request);
            let mut guard = self.responses.lock().unwrap();
            if guard.is_empty() {
                Err(McpError::connection("no more canned responses"))
            } else {
                Ok(guard.remove(0))
            }
        }

        async fn notify(&self, notification: JsonRpcNotification) -> Result<(), McpError> {
            self.notified.lock().unwrap().push(notification.method);
            Ok(())
        }

        async fn close(&self) -> Result<(), McpError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn initialize_sends_handshake_and_notification() {
        let transport = MockTransport::new(vec![JsonRpcResponse::ok(
            1,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "Bright Data", "version": "2.0.0"}
            }),
        )]);
        let sent = Arc::clone(&transport.sent);
        let notified = Arc::clone(&transport.notified);
        let client = McpClient::new(Box::new(transport));

        let init = client.initialize().await.unwrap();
        assert_eq!(init.server_info.name, "Bright Data");

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].method, "initialize");
        assert_eq!(sent[0].params.as_ref().unwrap()["protocolVersion"], "2024-11-05");
        assert_eq!(*notified.lock().unwrap(), vec!["notifications/initialized"]);
    }

    #[tokio::test]
    async fn list_tools_follows_cursor() {
        let transport = MockTransport::new(vec![
            JsonRpcResponse::ok(
                1,
                json!({"tools": [{"name": "search_engine", "description": "Search"}], "nextCursor": "page2"}),
            ),
            JsonRpcResponse::ok(
                2,
                json!({"tools": [{"name": "scrape_as_markdown"}], "nextCursor": ""}),
            ),
        ]);
        let sent = Arc::clone(&transport.sent);
        let client = McpClient::new(Box::new(transport));

        let tools = client.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["search_engine", "scrape_as_markdown"]);
        assert_eq!(sent.lock().unwrap()[1].params, Some(json!({"cursor": "page2"})));
    }

    #[tokio::test]
    async fn json_rpc_error_becomes_protocol_error() {
        let transport = MockTransport::new(vec![JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: Some(1),
            result: None,
            error: Some(JsonRpcError {
                code: -32602,
                message: "invalid params".into(),
                data: None,
            }),
        }]);
        let client = McpClient::new(Box::new(transport));

        let err = client.call_tool("search_engine", Map::new()).await.unwrap_err();
        assert_eq!(err, McpError::protocol("JSON-RPC error -32602: invalid params"));
    }

    #[tokio::test]
    async fn call_tool_returns_is_error_results() {
        let transport = MockTransport::new(vec![JsonRpcResponse::ok(
            1,
            json!({"content": [{"type": "text", "text": "zone not found"}], "isError": true}),
        )]);
        let client = McpClient::new(Box::new(transport));

        let mut args = Map::new();
        args.insert("url".into(), json!("https://finance.yahoo.com/quote/KO"));
        let result = client.call_tool("scrape_as_markdown", args).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.text(), "zone not found");
    }
}
