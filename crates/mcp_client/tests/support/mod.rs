#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use loopback_http::{open_stream, read_request, respond, CapturedRequest};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const SESSION_ID: &str = "session-7";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// POST /mcp; `tools/call` replies arrive as an SSE response body.
    Streamable,
    /// GET /sse carries replies; POST /messages is acknowledged with 202.
    LegacySse,
}

/// Loopback MCP server answering `initialize`, `tools/list` and `tools/call`.
pub struct FakeMcpServer {
    pub base_url: String,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    handle: JoinHandle<()>,
}

impl FakeMcpServer {
    pub async fn start(mode: Mode, tools: Value) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("local TCP listener should bind");
        let base_url = format!("http://{}", listener.local_addr().expect("listener address"));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let (events, _) = broadcast::channel::<String>(64);

        let handle = tokio::spawn({
            let captured = Arc::clone(&captured);
            async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let captured = Arc::clone(&captured);
                    let tools = tools.clone();
                    let events = events.clone();
                    tokio::spawn(async move {
                        serve(socket, mode, tools, captured, events).await;
                    });
                }
            }
        });

        Self {
            base_url,
            captured,
            handle,
        }
    }

    pub fn captured(&self) -> Vec<CapturedRequest> {
        self.captured.lock().expect("captured lock").clone()
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for FakeMcpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn answer(message: &Value, tools: &Value) -> Option<Value> {
    let id = message.get("id")?.clone();
    let method = message.get("method").and_then(Value::as_str).unwrap_or_default();
    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "fake", "version": "1.0"}
        }),
        "tools/list" => json!({"tools": tools}),
        "tools/call" => {
            let name = message["params"]["name"].as_str().unwrap_or_default();
            if name == "explode" {
                return Some(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32000, "message": "tool exploded"}
                }));
            }
            json!({
                "content": [{"type": "text", "text": format!("{name}: {}", message["params"]["arguments"])}],
                "isError": false
            })
        }
        _ => json!({}),
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

async fn serve(
    mut socket: TcpStream,
    mode: Mode,
    tools: Value,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    events: broadcast::Sender<String>,
) {
    let Ok(request) = read_request(&mut socket).await else {
        return;
    };
    captured.lock().expect("captured lock").push(request.clone());

    match (mode, request.method.as_str()) {
        (Mode::LegacySse, "GET") => {
            let mut receiver = events.subscribe();
            if open_stream(&mut socket, 200, "text/event-stream").await.is_err() {
                return;
            }
            if socket
                .write_all(b"event: endpoint\ndata: /messages?sessionId=abc\n\n")
                .await
                .is_err()
            {
                return;
            }
            while let Ok(message) = receiver.recv().await {
                let frame = format!("event: message\ndata: {message}\n\n");
                if socket.write_all(frame.as_bytes()).await.is_err() {
                    return;
                }
            }
        }
        (Mode::LegacySse, "POST") => {
            if let Ok(message) = serde_json::from_slice::<Value>(&request.body) {
                if let Some(reply) = answer(&message, &tools) {
                    let _ = events.send(reply.to_string());
                }
            }
            let _ = respond(&mut socket, 202, "text/plain", &[], b"").await;
        }
        (Mode::Streamable, "POST") => {
            let Ok(message) = serde_json::from_slice::<Value>(&request.body) else {
                let _ = respond(&mut socket, 400, "text/plain", &[], b"bad json").await;
                return;
            };
            let method = message.get("method").and_then(Value::as_str).unwrap_or_default().to_string();
            if method != "initialize" && request.header("mcp-session-id") != Some(SESSION_ID) {
                let _ = respond(&mut socket, 404, "text/plain", &[], b"unknown session").await;
                return;
            }
            match answer(&message, &tools) {
                None => {
                    let _ = respond(&mut socket, 202, "text/plain", &[], b"").await;
                }
                Some(reply) if method == "tools/call" => {
                    let body = format!("event: message\ndata: {reply}\n\n");
                    let _ = respond(&mut socket, 200, "text/event-stream", &[], body.as_bytes()).await;
                }
                Some(reply) => {
                    let extra = [("Mcp-Session-Id", SESSION_ID)];
                    let headers: &[(&str, &str)] = if method == "initialize" { &extra } else { &[] };
                    let _ = respond(&mut socket, 200, "application/json", headers, reply.to_string().as_bytes()).await;
                }
            }
        }
        (Mode::Streamable, "DELETE") => {
            let _ = respond(&mut socket, 200, "text/plain", &[], b"").await;
        }
        _ => {
            let _ = respond(&mut socket, 405, "text/plain", &[], b"").await;
        }
    }
}
