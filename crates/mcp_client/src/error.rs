use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionState;

/// Failure talking to an MCP server. Cloneable so one transport failure can
/// be delivered to every request waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum McpError {
    #[error("invalid configuration for MCP server '{server}': {message}")]
    Config { server: String, message: String },
    #[error("failed to start MCP server '{server}': {message}")]
    Spawn { server: String, message: String },
    #[error("MCP transport failure: {0}")]
    Transport(String),
    #[error("MCP server answered HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("MCP server error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed MCP message: {0}")]
    Protocol(String),
    #[error("MCP request '{method}' timed out after {}s", timeout.as_secs_f32())]
    Timeout { method: String, timeout: Duration },
    #[error("MCP server '{server}' is unavailable ({state})")]
    Unavailable { server: String, state: ConnectionState },
    #[error("MCP server '{0}' is not configured")]
    UnknownServer(String),
    #[error("MCP connection closed: {0}")]
    Closed(String),
    #[error("MCP request was cancelled")]
    Cancelled,
}

impl From<agent_provider::Cancelled> for McpError {
    fn from(_: agent_provider::Cancelled) -> Self {
        Self::Cancelled
    }
}

impl From<reqwest::Error> for McpError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

impl From<serde_json::Error> for McpError {
    fn from(error: serde_json::Error) -> Self {
        Self::Protocol(error.to_string())
    }
}
