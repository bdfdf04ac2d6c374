use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use agent_provider::{CancelSignal, ToolDescriptor, ToolOrigin};
use futures_util::future::join_all;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::McpConfig;
use crate::connection::{ConnectionState, McpConnection};
use crate::error::McpError;
use crate::lock_unpoisoned;
use crate::protocol::McpTool;

/// Timeouts applied to every server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpSettings {
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl McpSettings {
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// A tool the catalog exposes, and the server that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub server_id: String,
    pub tool: McpTool,
}

impl CatalogEntry {
    #[must_use]
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.tool.name.clone(),
            description: self.tool.description.clone().unwrap_or_default(),
            input_schema: self.tool.input_schema.clone(),
            origin: ToolOrigin::Mcp {
                server_id: self.server_id.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// A native tool already uses the name.
    ShadowsNative,
    /// An earlier server (in id order) already exposes the name.
    DuplicateOf { server_id: String },
}

/// A server tool left out of the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedTool {
    pub server_id: String,
    pub tool_name: String,
    pub reason: RejectionReason,
}

impl std::fmt::Display for RejectedTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            RejectionReason::ShadowsNative => write!(
                f,
                "tool '{}' from MCP server '{}' conflicts with a built-in tool",
                self.tool_name, self.server_id
            ),
            RejectionReason::DuplicateOf { server_id } => write!(
                f,
                "tool '{}' from MCP server '{}' is already provided by '{server_id}'",
                self.tool_name, self.server_id
            ),
        }
    }
}

/// Snapshot of the MCP tools currently callable. Names are unique and never
/// collide with a reserved native name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCatalog {
    entries: Vec<CatalogEntry>,
    rejected: Vec<RejectedTool>,
}

impl ToolCatalog {
    /// Servers are visited in the given order; the first claimant of a name
    /// keeps it.
    pub fn build<'a>(reserved: &BTreeSet<String>, servers: impl IntoIterator<Item = (&'a str, &'a [McpTool])>) -> Self {
        let mut catalog = Self::default();
        let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
        for (server_id, tools) in servers {
            for tool in tools {
                let reason = if reserved.contains(&tool.name) {
                    Some(RejectionReason::ShadowsNative)
                } else {
                    owners.get(tool.name.as_str()).map(|owner| RejectionReason::DuplicateOf {
                        server_id: (*owner).to_string(),
                    })
                };
                match reason {
                    Some(reason) => catalog.rejected.push(RejectedTool {
                        server_id: server_id.to_string(),
                        tool_name: tool.name.clone(),
                        reason,
                    }),
                    None => {
                        owners.insert(tool.name.as_str(), server_id);
                        catalog.entries.push(CatalogEntry {
                            server_id: server_id.to_string(),
                            tool: tool.clone(),
                        });
                    }
                }
            }
        }
        catalog
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.tool.name == name)
    }

    #[must_use]
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    #[must_use]
    pub fn rejected(&self) -> &[RejectedTool] {
        &self.rejected
    }

    #[must_use]
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.entries.iter().map(CatalogEntry::descriptor).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of an MCP tool call, flattened to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpToolOutput {
    pub content: String,
    pub is_error: bool,
}

/// Status line for one configured server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub server_id: String,
    pub transport: &'static str,
    pub state: ConnectionState,
    pub tool_count: usize,
    pub server_name: Option<String>,
    pub last_error: Option<String>,
}

struct ManagerInner {
    connections: BTreeMap<String, McpConnection>,
    reserved: BTreeSet<String>,
    catalog: Mutex<Arc<ToolCatalog>>,
}

impl ManagerInner {
    fn rebuild(&self) {
        let ready = self
            .connections
            .iter()
            .filter(|(_, connection)| connection.state() == ConnectionState::Ready)
            .map(|(id, connection)| (id.as_str(), connection.tools()));
        let catalog = ToolCatalog::build(&self.reserved, ready);
        for rejected in catalog.rejected() {
            tracing::warn!(server = %rejected.server_id, tool = %rejected.tool_name, "{rejected}");
        }
        tracing::debug!(tools = catalog.entries().len(), "MCP tool catalog rebuilt");
        *lock_unpoisoned(&self.catalog) = Arc::new(catalog);
    }
}

/// Owns every configured MCP connection and the merged tool catalog.
pub struct McpManager {
    inner: Arc<ManagerInner>,
    watchers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for McpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpManager")
            .field("servers", &self.inner.connections.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl McpManager {
    /// A manager with no servers.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                connections: BTreeMap::new(),
                reserved: BTreeSet::new(),
                catalog: Mutex::new(Arc::new(ToolCatalog::default())),
            }),
            watchers: Vec::new(),
        }
    }

    /// Connects to every configured server concurrently. Servers that fail
    /// stay listed as `Degraded`; startup itself never fails.
    pub async fn start(config: &McpConfig, reserved_names: impl IntoIterator<Item = String>, settings: McpSettings) -> Self {
        let connections = join_all(
            config
                .servers
                .iter()
                .map(|(id, server)| McpConnection::connect(id, server, &settings)),
        )
        .await;
        let connections: BTreeMap<String, McpConnection> = connections
            .into_iter()
            .map(|connection| (connection.server_id().to_string(), connection))
            .collect();

        let inner = Arc::new(ManagerInner {
            connections,
            reserved: reserved_names.into_iter().collect(),
            catalog: Mutex::new(Arc::new(ToolCatalog::default())),
        });
        inner.rebuild();

        let watchers = inner
            .connections
            .values()
            .map(|connection| {
                let mut changes = connection.subscribe();
                let inner: Weak<ManagerInner> = Arc::downgrade(&inner);
                tokio::spawn(async move {
                    while changes.changed().await.is_ok() {
                        match inner.upgrade() {
                            Some(inner) => inner.rebuild(),
                            None => return,
                        }
                    }
                })
            })
            .collect();

        Self { inner, watchers }
    }

    /// The current catalog. Cheap to call; returns a shared snapshot.
    #[must_use]
    pub fn catalog(&self) -> Arc<ToolCatalog> {
        Arc::clone(&lock_unpoisoned(&self.inner.catalog))
    }

    #[must_use]
    pub fn state(&self, server_id: &str) -> Option<ConnectionState> {
        self.inner.connections.get(server_id).map(McpConnection::state)
    }

    #[must_use]
    pub fn statuses(&self) -> Vec<ServerStatus> {
        self.inner
            .connections
            .values()
            .map(|connection| ServerStatus {
                server_id: connection.server_id().to_string(),
                transport: connection.transport_name(),
                state: connection.state(),
                tool_count: connection.tools().len(),
                server_name: connection.server_info().map(|info| info.name.clone()),
                last_error: connection.last_error(),
            })
            .collect()
    }

    /// Calls `tool_name` on `server_id`.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Value,
        cancel: &CancelSignal,
    ) -> Result<McpToolOutput, McpError> {
        let connection = self
            .inner
            .connections
            .get(server_id)
            .ok_or_else(|| McpError::UnknownServer(server_id.to_string()))?;
        let result = connection.call_tool(tool_name, arguments, cancel).await?;
        Ok(McpToolOutput {
            content: result.flatten(),
            is_error: result.is_error,
        })
    }

    /// Closes every connection. The catalog is empty afterwards.
    pub async fn shutdown(&self) {
        for watcher in &self.watchers {
            watcher.abort();
        }
        join_all(self.inner.connections.values().map(McpConnection::shutdown)).await;
        self.inner.rebuild();
    }
}

impl Drop for McpManager {
    fn drop(&mut self) {
        for watcher in &self.watchers {
            watcher.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn tool(name: &str) -> McpTool {
        McpTool {
            name: name.to_string(),
            description: Some(format!("{name} tool")),
            input_schema: json!({"type": "object"}),
        }
    }

    #[test]
    fn native_names_and_earlier_servers_win() {
        let reserved: BTreeSet<String> = ["read_file".to_string()].into();
        let alpha = vec![tool("read_file"), tool("search")];
        let beta = vec![tool("search"), tool("fetch")];

        let catalog = ToolCatalog::build(&reserved, [("alpha", alpha.as_slice()), ("beta", beta.as_slice())]);

        let names: Vec<(&str, &str)> = catalog
            .entries()
            .iter()
            .map(|entry| (entry.server_id.as_str(), entry.tool.name.as_str()))
            .collect();
        assert_eq!(names, vec![("alpha", "search"), ("beta", "fetch")]);
        assert_eq!(
            catalog.rejected(),
            &[
                RejectedTool {
                    server_id: "alpha".to_string(),
                    tool_name: "read_file".to_string(),
                    reason: RejectionReason::ShadowsNative,
                },
                RejectedTool {
                    server_id: "beta".to_string(),
                    tool_name: "search".to_string(),
                    reason: RejectionReason::DuplicateOf {
                        server_id: "alpha".to_string()
                    },
                },
            ]
        );
    }

    #[test]
    fn descriptors_carry_server_origin() {
        let tools = vec![tool("fetch")];
        let catalog = ToolCatalog::build(&BTreeSet::new(), [("web", tools.as_slice())]);

        let descriptor = &catalog.descriptors()[0];
        assert_eq!(descriptor.description, "fetch tool");
        assert_eq!(
            descriptor.origin,
            ToolOrigin::Mcp {
                server_id: "web".to_string()
            }
        );
        assert_eq!(catalog.get("fetch").map(|entry| entry.server_id.as_str()), Some("web"));
        assert!(catalog.get("missing").is_none());
    }

    #[tokio::test]
    async fn empty_manager_reports_unknown_servers() {
        let manager = McpManager::empty();
        assert!(manager.catalog().is_empty());
        assert!(manager.statuses().is_empty());

        let cancel = agent_provider::new_cancel_signal();
        let error = manager.call_tool("nope", "tool", json!({}), &cancel).await.unwrap_err();
        assert_eq!(error, McpError::UnknownServer("nope".to_string()));
    }
}
