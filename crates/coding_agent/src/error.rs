use std::fmt;

use agent_provider::ProviderError;
use agent_providers::AdapterError;
use credentials::CredentialError;
use mcp_client::McpError;
use session_store::SessionStoreError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::tools::ToolError;

/// Category of a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TransportError,
    AuthError,
    ToolError,
    PatchConflict,
    SandboxViolation,
    McpServerUnavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TransportError => "transport error",
            Self::AuthError => "authentication error",
            Self::ToolError => "tool error",
            Self::PatchConflict => "patch conflict",
            Self::SandboxViolation => "sandbox violation",
            Self::McpServerUnavailable => "MCP server unavailable",
        })
    }
}

/// Part of the engine that raised a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Orchestrator,
    ProviderAdapter,
    CredentialManager,
    NativeTools,
    PatchEngine,
    McpClient,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Orchestrator => "orchestrator",
            Self::ProviderAdapter => "provider adapter",
            Self::CredentialManager => "credential manager",
            Self::NativeTools => "native tools",
            Self::PatchEngine => "patch engine",
            Self::McpClient => "MCP client",
        })
    }
}

/// A failure as surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub component: Component,
    pub message: String,
    /// False when the session cannot continue without user action.
    pub session_usable: bool,
}

impl ErrorReport {
    #[must_use]
    pub fn new(kind: ErrorKind, component: Component, message: impl Into<String>) -> Self {
        Self {
            kind,
            component,
            message: message.into(),
            session_usable: true,
        }
    }

    #[must_use]
    pub fn unusable(mut self) -> Self {
        self.session_usable = false;
        self
    }

    /// Provider failures abort the turn but keep the transcript, so the
    /// session stays usable for a retry.
    #[must_use]
    pub fn from_provider(error: &ProviderError) -> Self {
        match error {
            ProviderError::Auth { message } => {
                let component = if message.contains("/login") || message.contains("credential") {
                    Component::CredentialManager
                } else {
                    Component::ProviderAdapter
                };
                Self::new(ErrorKind::AuthError, component, error.to_string())
            }
            ProviderError::Status { status: 401 | 403, .. } => {
                Self::new(ErrorKind::AuthError, Component::ProviderAdapter, error.to_string())
            }
            _ => Self::new(ErrorKind::TransportError, Component::ProviderAdapter, error.to_string()),
        }
    }

    #[must_use]
    pub fn from_tool(tool_name: &str, error: &ToolError) -> Self {
        let (kind, component) = match error {
            ToolError::SandboxViolation { .. } => (ErrorKind::SandboxViolation, Component::NativeTools),
            ToolError::PatchConflict(_) => (ErrorKind::PatchConflict, Component::PatchEngine),
            ToolError::PatchFailed(_) => (ErrorKind::ToolError, Component::PatchEngine),
            _ => (ErrorKind::ToolError, Component::NativeTools),
        };
        Self::new(kind, component, format!("{tool_name}: {error}"))
    }

    #[must_use]
    pub fn from_mcp(server_id: &str, error: &McpError) -> Self {
        let kind = match error {
            McpError::Rpc { .. } | McpError::Protocol(_) | McpError::Cancelled => ErrorKind::ToolError,
            _ => ErrorKind::McpServerUnavailable,
        };
        Self::new(kind, Component::McpClient, format!("{server_id}: {error}"))
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}: {}", self.kind, self.component, self.message)
    }
}

/// Failure building or driving a session.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to prepare workspace tools: {0}")]
    Workspace(#[source] ToolError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Session(#[from] SessionStoreError),
    #[error("unknown provider '{id}'; configured providers: {available}")]
    UnknownProvider { id: String, available: String },
    #[error("nothing to retry: the transcript is empty")]
    NothingToRetry,
}
