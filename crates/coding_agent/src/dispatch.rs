use std::sync::Arc;

use agent_provider::{is_cancelled, CancelSignal, ToolCallRequest, ToolDescriptor, ToolOrigin};
use mcp_client::{McpError, McpManager, ToolCatalog};

use crate::error::{Component, ErrorKind, ErrorReport};
use crate::tools::{NativeTools, ToolError};

pub const CANCELLED_RESULT: &str = "tool call was cancelled before it completed";

/// Outcome of resolving one tool call, ready to commit as a result turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub content: String,
    pub summary: String,
    pub is_error: bool,
    pub cancelled: bool,
    /// Set when the failure should also be reported to the user.
    pub error: Option<ErrorReport>,
}

impl Resolution {
    fn success(content: String, summary: String) -> Self {
        Self {
            content,
            summary,
            is_error: false,
            cancelled: false,
            error: None,
        }
    }

    fn failure(content: String, summary: String, error: Option<ErrorReport>) -> Self {
        Self {
            content,
            summary,
            is_error: true,
            cancelled: false,
            error,
        }
    }

    #[must_use]
    pub fn cancelled(tool_name: &str) -> Self {
        Self {
            content: CANCELLED_RESULT.to_string(),
            summary: format!("{tool_name} cancelled"),
            is_error: true,
            cancelled: true,
            error: None,
        }
    }
}

/// Routes tool calls to the native tool set or the MCP server that owns the
/// name. Native names always win.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    native: Arc<NativeTools>,
    mcp: Arc<McpManager>,
}

impl ToolDispatcher {
    #[must_use]
    pub fn new(native: Arc<NativeTools>, mcp: Arc<McpManager>) -> Self {
        Self { native, mcp }
    }

    #[must_use]
    pub fn native(&self) -> &NativeTools {
        &self.native
    }

    #[must_use]
    pub fn mcp(&self) -> &McpManager {
        &self.mcp
    }

    #[must_use]
    pub fn catalog(&self) -> Arc<ToolCatalog> {
        self.mcp.catalog()
    }

    /// Native descriptors followed by the current MCP catalog.
    #[must_use]
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors = self.native.descriptors();
        descriptors.extend(self.mcp.catalog().descriptors());
        descriptors
    }

    #[must_use]
    pub fn origin(&self, tool_name: &str) -> Option<ToolOrigin> {
        if NativeTools::is_native(tool_name) {
            return Some(ToolOrigin::Native);
        }
        self.mcp.catalog().get(tool_name).map(|entry| ToolOrigin::Mcp {
            server_id: entry.server_id.clone(),
        })
    }

    pub async fn dispatch(&self, call: &ToolCallRequest, cancel: &CancelSignal) -> Resolution {
        if is_cancelled(cancel) {
            return Resolution::cancelled(&call.tool_name);
        }
        match self.origin(&call.tool_name) {
            Some(ToolOrigin::Native) => self.dispatch_native(call, cancel).await,
            Some(ToolOrigin::Mcp { server_id }) => self.dispatch_mcp(&server_id, call, cancel).await,
            None => {
                let error = ToolError::UnknownTool(call.tool_name.clone());
                tracing::warn!(tool = %call.tool_name, call_id = %call.call_id, "model requested an unknown tool");
                Resolution::failure(
                    error.to_string(),
                    format!("{} (unknown tool)", call.tool_name),
                    Some(ErrorReport::new(
                        ErrorKind::ToolError,
                        Component::Orchestrator,
                        error.to_string(),
                    )),
                )
            }
        }
    }

    async fn dispatch_native(&self, call: &ToolCallRequest, cancel: &CancelSignal) -> Resolution {
        let native = Arc::clone(&self.native);
        let name = call.tool_name.clone();
        let arguments = call.arguments.clone();
        let task_cancel = cancel.clone();
        let outcome =
            tokio::task::spawn_blocking(move || native.execute(&name, &arguments, &task_cancel)).await;

        let result = match outcome {
            Ok(result) => result,
            Err(join_error) => Err(ToolError::Failed(format!("tool task failed: {join_error}"))),
        };
        match result {
            Ok(output) => {
                tracing::debug!(tool = %call.tool_name, call_id = %call.call_id, "native tool succeeded");
                Resolution::success(output.content, output.summary)
            }
            Err(ToolError::Cancelled) => Resolution::cancelled(&call.tool_name),
            Err(error) => {
                tracing::debug!(tool = %call.tool_name, call_id = %call.call_id, %error, "native tool failed");
                let report = ErrorReport::from_tool(&call.tool_name, &error);
                // Reported failures are the ones the user should notice even
                // though the model also sees them.
                let surfaced = matches!(
                    report.kind,
                    ErrorKind::SandboxViolation | ErrorKind::PatchConflict
                );
                Resolution::failure(
                    error.to_string(),
                    format!("{} failed", call.tool_name),
                    surfaced.then_some(report),
                )
            }
        }
    }

    async fn dispatch_mcp(&self, server_id: &str, call: &ToolCallRequest, cancel: &CancelSignal) -> Resolution {
        let summary = format!("{} via mcp:{server_id}", call.tool_name);
        match self
            .mcp
            .call_tool(server_id, &call.tool_name, call.arguments.clone(), cancel)
            .await
        {
            Ok(output) if output.is_error => Resolution::failure(output.content, format!("{summary} (error)"), None),
            Ok(output) => Resolution::success(output.content, summary),
            Err(McpError::Cancelled) => Resolution::cancelled(&call.tool_name),
            Err(error) => {
                tracing::warn!(server = %server_id, tool = %call.tool_name, %error, "MCP tool call failed");
                let report = ErrorReport::from_mcp(server_id, &error);
                Resolution::failure(error.to_string(), format!("{summary} (failed)"), Some(report))
            }
        }
    }
}
