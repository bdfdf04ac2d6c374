//! Byte-level plumbing for the three MCP transports.
//!
//! Every transport pushes whatever the server sends into one inbound channel
//! and reports its own end with `TransportEvent::Closed`. Request/response
//! correlation lives in the connection, not here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::McpServerConfig;
use crate::error::McpError;

mod http;
mod sse;
mod stdio;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TransportEvent {
    Message(Value),
    Closed(String),
}

pub(crate) type InboundSender = mpsc::UnboundedSender<TransportEvent>;

pub(crate) trait Transport: Send + Sync {
    /// Delivers one JSON-RPC message to the server.
    fn send(&self, message: Value) -> BoxFuture<'_, Result<(), McpError>>;

    /// Releases the transport. Idempotent.
    fn close(&self) -> BoxFuture<'_, ()>;
}

pub(crate) async fn open(
    server_id: &str,
    config: &McpServerConfig,
    inbound: InboundSender,
    connect_timeout: Duration,
) -> Result<Arc<dyn Transport>, McpError> {
    match config {
        McpServerConfig::Stdio { command, args, env } => {
            let transport = stdio::StdioTransport::spawn(server_id, command, args, env, inbound)?;
            Ok(Arc::new(transport))
        }
        McpServerConfig::Http { url, headers } => {
            let transport = http::HttpTransport::new(server_id, url, header_map(server_id, headers)?, inbound)?;
            Ok(Arc::new(transport))
        }
        McpServerConfig::Sse { url, headers } => {
            let transport =
                sse::SseTransport::connect(server_id, url, header_map(server_id, headers)?, inbound, connect_timeout)
                    .await?;
            Ok(Arc::new(transport))
        }
    }
}

fn header_map(server_id: &str, headers: &BTreeMap<String, String>) -> Result<HeaderMap, McpError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let invalid = |message: String| McpError::Config {
            server: server_id.to_string(),
            message,
        };
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|error| invalid(format!("invalid header name '{name}': {error}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|error| invalid(format!("invalid value for header '{name}': {error}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Parses one SSE `data` payload (or JSON body) into messages. A batch array
/// yields each element.
pub(crate) fn forward_payload(server_id: &str, payload: &str, inbound: &InboundSender) {
    let payload = payload.trim();
    if payload.is_empty() {
        return;
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Array(batch)) => {
            for message in batch {
                let _ = inbound.send(TransportEvent::Message(message));
            }
        }
        Ok(message) => {
            let _ = inbound.send(TransportEvent::Message(message));
        }
        Err(error) => tracing::warn!(server = server_id, %error, "discarding malformed MCP message"),
    }
}
