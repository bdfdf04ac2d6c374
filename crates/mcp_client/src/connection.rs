use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_provider::{await_or_cancel, CancelSignal};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::McpServerConfig;
use crate::error::McpError;
use crate::protocol::{
    initialize_params, notification, reply_to_server_request, request, CallToolResult, Incoming,
    InitializeResult, McpTool, ServerInfo, ToolsListResult, PROTOCOL_VERSION,
};
use crate::transport::{self, Transport, TransportEvent};
use crate::{lock_unpoisoned, McpSettings};

const MAX_TOOL_PAGES: usize = 64;

/// Lifecycle of one server connection.
///
/// `Connecting` ends in `Ready` or, when the handshake fails, `Degraded`.
/// A `Ready` connection becomes `Closed` when its transport ends or on
/// shutdown. Only `Ready` connections contribute tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
    Degraded,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        })
    }
}

type PendingReplies = HashMap<u64, oneshot::Sender<Result<Value, McpError>>>;

struct Shared {
    server_id: String,
    pending: Mutex<PendingReplies>,
    state: watch::Sender<ConnectionState>,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    fn fail_pending(&self, error: &McpError) {
        for (_, reply) in lock_unpoisoned(&self.pending).drain() {
            let _ = reply.send(Err(error.clone()));
        }
    }

    /// The transport ended on its own.
    fn transport_closed(&self, reason: String) {
        self.fail_pending(&McpError::Closed(reason.clone()));
        let was_ready = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Ready {
                *state = ConnectionState::Closed;
                true
            } else {
                false
            }
        });
        if was_ready {
            tracing::warn!(server = %self.server_id, %reason, "MCP server disconnected");
            *lock_unpoisoned(&self.last_error) = Some(reason);
        }
    }
}

/// One configured MCP server and its tool list.
pub struct McpConnection {
    shared: Arc<Shared>,
    transport_name: &'static str,
    transport: Option<Arc<dyn Transport>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    tools: Vec<McpTool>,
    server_info: Option<ServerInfo>,
    request_timeout: Duration,
}

impl fmt::Debug for McpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpConnection")
            .field("server_id", &self.shared.server_id)
            .field("transport", &self.transport_name)
            .field("state", &self.state())
            .field("tools", &self.tools.len())
            .finish()
    }
}

impl McpConnection {
    /// Connects and performs the handshake. Never fails: a server that cannot
    /// be reached comes back `Degraded` with its error in `last_error`.
    pub async fn connect(server_id: &str, config: &McpServerConfig, settings: &McpSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let mut connection = Self {
            shared: Arc::new(Shared {
                server_id: server_id.to_string(),
                pending: Mutex::new(HashMap::new()),
                state,
                last_error: Mutex::new(None),
            }),
            transport_name: config.transport_name(),
            transport: None,
            pump: Mutex::new(None),
            next_id: AtomicU64::new(1),
            tools: Vec::new(),
            server_info: None,
            request_timeout: settings.request_timeout,
        };
        tracing::info!(server = server_id, transport = connection.transport_name, "connecting to MCP server");

        let timeout = settings.handshake_timeout;
        let outcome = match tokio::time::timeout(timeout, connection.handshake(config, timeout)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(McpError::Timeout {
                method: "initialize".to_string(),
                timeout,
            }),
        };

        match outcome {
            Ok(()) => {
                connection.shared.state.send_replace(ConnectionState::Ready);
                tracing::info!(
                    server = server_id,
                    tools = connection.tools.len(),
                    server_name = connection.server_info.as_ref().map(|info| info.name.as_str()),
                    "MCP server ready"
                );
            }
            Err(error) => {
                tracing::warn!(server = server_id, %error, "MCP server unavailable");
                connection.release(&error).await;
                *lock_unpoisoned(&connection.shared.last_error) = Some(error.to_string());
                connection.shared.state.send_replace(ConnectionState::Degraded);
            }
        }
        connection
    }

    async fn handshake(&mut self, config: &McpServerConfig, timeout: Duration) -> Result<(), McpError> {
        let (inbound, events) = mpsc::unbounded_channel();
        let transport = transport::open(&self.shared.server_id, config, inbound, timeout).await?;
        self.transport = Some(Arc::clone(&transport));
        *lock_unpoisoned(&self.pump) = Some(tokio::spawn(pump(Arc::clone(&self.shared), transport, events)));

        let result = self.request("initialize", Some(initialize_params()), timeout).await?;
        let init: InitializeResult = serde_json::from_value(result)?;
        if init.protocol_version != PROTOCOL_VERSION {
            tracing::debug!(
                server = %self.shared.server_id,
                version = %init.protocol_version,
                "server negotiated a different protocol version"
            );
        }
        self.server_info = init.server_info;
        self.notify("notifications/initialized").await?;
        self.tools = self.fetch_tools(timeout).await?;
        Ok(())
    }

    async fn fetch_tools(&self, timeout: Duration) -> Result<Vec<McpTool>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.as_ref().map(|cursor| json!({"cursor": cursor}));
            let page: ToolsListResult = serde_json::from_value(self.request("tools/list", params, timeout).await?)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }
        Err(McpError::Protocol(format!("tools/list returned more than {MAX_TOOL_PAGES} pages")))
    }

    async fn request(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value, McpError> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| McpError::Closed("not connected".to_string()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();
        lock_unpoisoned(&self.shared.pending).insert(id, reply);
        tracing::debug!(server = %self.shared.server_id, id, method, "MCP request");

        if let Err(error) = transport.send(request(id, method, params)).await {
            lock_unpoisoned(&self.shared.pending).remove(&id);
            return Err(error);
        }
        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpError::Closed("connection dropped the request".to_string())),
            Err(_) => {
                lock_unpoisoned(&self.shared.pending).remove(&id);
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    async fn notify(&self, method: &str) -> Result<(), McpError> {
        match &self.transport {
            Some(transport) => transport.send(notification(method, None)).await,
            None => Err(McpError::Closed("not connected".to_string())),
        }
    }

    #[must_use]
    pub fn server_id(&self) -> &str {
        &self.shared.server_id
    }

    #[must_use]
    pub fn transport_name(&self) -> &'static str {
        self.transport_name
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Tools advertised during the handshake.
    #[must_use]
    pub fn tools(&self) -> &[McpTool] {
        &self.tools
    }

    #[must_use]
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        lock_unpoisoned(&self.shared.last_error).clone()
    }

    /// Invokes `tools/call`. Only `Ready` connections accept calls.
    pub async fn call_tool(&self, name: &str, arguments: Value, cancel: &CancelSignal) -> Result<CallToolResult, McpError> {
        let state = self.state();
        if state != ConnectionState::Ready {
            return Err(McpError::Unavailable {
                server: self.shared.server_id.clone(),
                state,
            });
        }
        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        let params = json!({"name": name, "arguments": arguments});
        let result = await_or_cancel(self.request("tools/call", Some(params), self.request_timeout), cancel).await??;
        Ok(serde_json::from_value(result)?)
    }

    /// Closes the transport and marks the connection `Closed`.
    pub async fn shutdown(&self) {
        let previous = self.shared.state.send_replace(ConnectionState::Closed);
        self.release(&McpError::Closed("connection shut down".to_string())).await;
        if previous != ConnectionState::Closed {
            tracing::info!(server = %self.shared.server_id, "MCP connection closed");
        }
    }

    async fn release(&self, error: &McpError) {
        if let Some(pump) = lock_unpoisoned(&self.pump).take() {
            pump.abort();
        }
        if let Some(transport) = &self.transport {
            transport.close().await;
        }
        self.shared.fail_pending(error);
    }
}

impl Drop for McpConnection {
    fn drop(&mut self) {
        if let Some(pump) = lock_unpoisoned(&self.pump).take() {
            pump.abort();
        }
    }
}

/// Routes inbound messages: responses to their waiting request, server
/// requests to an automatic reply, notifications to the log.
async fn pump(shared: Arc<Shared>, transport: Arc<dyn Transport>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let message = match event {
            TransportEvent::Message(message) => message,
            TransportEvent::Closed(reason) => {
                shared.transport_closed(reason);
                return;
            }
        };
        match Incoming::classify(message) {
            Ok(Incoming::Response { id, outcome }) => match lock_unpoisoned(&shared.pending).remove(&id) {
                Some(reply) => {
                    let _ = reply.send(outcome.map_err(McpError::from));
                }
                None => tracing::debug!(server = %shared.server_id, id, "discarding unmatched MCP response"),
            },
            Ok(Incoming::Notification { method, params }) => log_notification(&shared.server_id, &method, params.as_ref()),
            Ok(Incoming::Request { id, method }) => {
                tracing::debug!(server = %shared.server_id, %method, "answering server request");
                if let Err(error) = transport.send(reply_to_server_request(id, &method)).await {
                    tracing::warn!(server = %shared.server_id, %error, "failed to answer server request");
                }
            }
            Err(error) => tracing::warn!(server = %shared.server_id, %error, "ignoring invalid MCP message"),
        }
    }
    shared.transport_closed("transport stopped".to_string());
}

fn log_notification(server_id: &str, method: &str, params: Option<&Value>) {
    if method == "notifications/message" {
        let data = params.and_then(|params| params.get("data"));
        let text = data
            .and_then(|data| data.get("message").or(Some(data)))
            .map(|value| value.as_str().map_or_else(|| value.to_string(), str::to_string))
            .unwrap_or_default();
        tracing::info!(server = server_id, "MCP server log: {text}");
    } else {
        tracing::debug!(server = server_id, method, "MCP notification");
    }
}
