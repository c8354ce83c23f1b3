//! Tool provider access over the Model Context Protocol.
//!
//! ```text
//! ToolConnector::connect (startup, never fails)
//!   └── ToolSet (descriptors from every reachable server)
//!         └── McpClient (protocol operations, one per server)
//!               └── McpTransport (stdio child process / HTTP POST)
//! ```

pub mod client;
pub mod connector;
pub mod transport;
pub mod types;

use thiserror::Error;

pub use client::McpClient;
pub use connector::{ToolConnector, ToolDescriptor, ToolHandle, ToolSet};
pub use transport::{HttpTransport, McpTransport, StdioTransport};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum McpError {
    /// Process, pipe or network failure.
    #[error("MCP connection error: {message}")]
    Connection { message: String },

    /// Malformed response, JSON-RPC error or a tool reporting failure.
    #[error("MCP protocol error: {message}")]
    Protocol { message: String },

    #[error("MCP timeout after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The model asked for a tool nobody advertised.
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    /// The tool ran and reported failure (`isError`).
    #[error("tool {name} failed: {message}")]
    ToolFailed { name: String, message: String },
}

impl McpError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::McpError;

    #[test]
    fn error_display() {
        assert_eq!(
            McpError::connection("refused").to_string(),
            "MCP connection error: refused"
        );
        assert_eq!(
            McpError::protocol("invalid").to_string(),
            "MCP protocol error: invalid"
        );
        assert_eq!(
            McpError::Timeout { elapsed_ms: 3000 }.to_string(),
            "MCP timeout after 3000ms"
        );
        assert_eq!(
            McpError::UnknownTool {
                name: "get_quote".into()
            }
            .to_string(),
            "unknown tool: get_quote"
        );
        assert_eq!(
            McpError::ToolFailed {
                name: "search_engine".into(),
                message: "quota exceeded".into()
            }
            .to_string(),
            "tool search_engine failed: quota exceeded"
        );
    }
}
