//! JSON-RPC 2.0 framing and the MCP message shapes this client uses.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::McpError;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const CLIENT_NAME: &str = "agent_engine";

const METHOD_NOT_FOUND: i64 = -32601;

#[must_use]
pub fn request(id: u64, method: &str, params: Option<Value>) -> Value {
    let mut message = json!({"jsonrpc": "2.0", "id": id, "method": method});
    if let Some(params) = params {
        message["params"] = params;
    }
    message
}

#[must_use]
pub fn notification(method: &str, params: Option<Value>) -> Value {
    let mut message = json!({"jsonrpc": "2.0", "method": method});
    if let Some(params) = params {
        message["params"] = params;
    }
    message
}

#[must_use]
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {"name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION")}
    })
}

/// Reply to a request the server sent us. Only `ping` is supported.
#[must_use]
pub fn reply_to_server_request(id: Value, method: &str) -> Value {
    if method == "ping" {
        json!({"jsonrpc": "2.0", "id": id, "result": {}})
    } else {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": METHOD_NOT_FOUND, "message": format!("method '{method}' is not supported by this client")}
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl From<RpcError> for McpError {
    fn from(error: RpcError) -> Self {
        Self::Rpc {
            code: error.code,
            message: error.message,
        }
    }
}

/// A message received from a server.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response { id: u64, outcome: Result<Value, RpcError> },
    /// Has no `id`; logged, never treated as a response.
    Notification { method: String, params: Option<Value> },
    /// Server-initiated request that expects a reply.
    Request { id: Value, method: String },
}

impl Incoming {
    pub fn classify(message: Value) -> Result<Self, McpError> {
        let Value::Object(mut object) = message else {
            return Err(McpError::Protocol("message is not a JSON object".to_string()));
        };
        let method = object.remove("method").and_then(|method| method.as_str().map(str::to_string));
        let id = object.remove("id").filter(|id| !id.is_null());

        match (id, method) {
            (None, Some(method)) => Ok(Self::Notification {
                method,
                params: object.remove("params"),
            }),
            (Some(id), Some(method)) => Ok(Self::Request { id, method }),
            (Some(id), None) => {
                let id = id
                    .as_u64()
                    .or_else(|| id.as_str().and_then(|text| text.parse().ok()))
                    .ok_or_else(|| McpError::Protocol(format!("unexpected response id {id}")))?;
                let outcome = match object.remove("error") {
                    Some(error) => Err(serde_json::from_value(error)?),
                    None => Ok(object.remove("result").unwrap_or(Value::Null)),
                };
                Ok(Self::Response { id, outcome })
            }
            (None, None) => Err(McpError::Protocol("message has neither id nor method".to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

fn object_schema() -> Value {
    json!({"type": "object"})
}

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "object_schema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsListResult {
    pub tools: Vec<McpTool>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: ResourceContents,
    },
    #[serde(skip)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Content blocks; unknown kinds map to `Unsupported`.
    #[must_use]
    pub fn blocks(&self) -> Vec<ToolContent> {
        self.content
            .iter()
            .map(|block| serde_json::from_value(block.clone()).unwrap_or(ToolContent::Unsupported))
            .collect()
    }

    /// Renders every content block as text for the model.
    #[must_use]
    pub fn flatten(&self) -> String {
        self.blocks()
            .into_iter()
            .map(|block| match block {
                ToolContent::Text { text } => text,
                ToolContent::Image { data, mime_type } => {
                    format!("[image: {mime_type}, {} bytes base64]", data.len())
                }
                ToolContent::Resource { resource } => match resource.text {
                    Some(text) => text,
                    None => format!(
                        "[resource: {}{}]",
                        resource.uri,
                        resource.mime_type.as_deref().map(|mime| format!(", {mime}")).unwrap_or_default()
                    ),
                },
                ToolContent::Unsupported => "[unsupported content]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{request, CallToolResult, Incoming, McpTool, RpcError};

    #[test]
    fn request_omits_absent_params() {
        assert_eq!(request(4, "tools/list", None), json!({"jsonrpc": "2.0", "id": 4, "method": "tools/list"}));
    }

    #[test]
    fn classifies_responses_errors_and_notifications() {
        assert_eq!(
            Incoming::classify(json!({"jsonrpc": "2.0", "id": 3, "result": {"ok": true}})).expect("valid"),
            Incoming::Response {
                id: 3,
                outcome: Ok(json!({"ok": true}))
            }
        );
        assert_eq!(
            Incoming::classify(json!({"jsonrpc": "2.0", "id": "7", "error": {"code": -32602, "message": "bad"}}))
                .expect("valid"),
            Incoming::Response {
                id: 7,
                outcome: Err(RpcError {
                    code: -32602,
                    message: "bad".to_string()
                })
            }
        );
        assert_matches!(
            Incoming::classify(json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}})),
            Ok(Incoming::Notification { method, .. }) if method == "notifications/message"
        );
        assert_matches!(
            Incoming::classify(json!({"jsonrpc": "2.0", "id": 9, "method": "ping"})),
            Ok(Incoming::Request { method, .. }) if method == "ping"
        );
        assert!(Incoming::classify(json!([1, 2])).is_err());
    }

    #[test]
    fn missing_schema_defaults_to_object() {
        let tool: McpTool = serde_json::from_value(json!({"name": "echo"})).expect("parses");
        assert_eq!(tool.input_schema, json!({"type": "object"}));
    }

    #[test]
    fn tool_results_flatten_all_content_kinds() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "line"},
                {"type": "image", "data": "aGk=", "mimeType": "image/png"},
                {"type": "resource", "resource": {"uri": "file:///a", "text": "body"}},
                {"type": "resource", "resource": {"uri": "file:///b", "mimeType": "application/pdf"}},
                {"type": "audio", "data": "x"}
            ],
            "isError": true
        }))
        .expect("parses");

        assert!(result.is_error);
        assert_eq!(
            result.flatten(),
            "line\n[image: image/png, 4 bytes base64]\nbody\n[resource: file:///b, application/pdf]\n[unsupported content]"
        );
    }
}
