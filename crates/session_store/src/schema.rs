use agent_provider::Turn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SESSION_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRecordType {
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRecordType {
    Entry,
}

/// First line of every transcript file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionHeader {
    #[serde(rename = "type")]
    pub record_type: SessionRecordType,
    pub version: u32,
    pub session_id: String,
    pub created_at: String,
    pub cwd: String,
    /// Provider that was active when the session started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

impl SessionHeader {
    #[must_use]
    pub fn v1(session_id: impl Into<String>, created_at: impl Into<String>, cwd: impl Into<String>) -> Self {
        Self {
            record_type: SessionRecordType::Session,
            version: SESSION_VERSION,
            session_id: session_id.into(),
            created_at: created_at.into(),
            cwd: cwd.into(),
            provider_id: None,
        }
    }
}

/// One transcript turn, linked to the turn it follows. Unknown fields are
/// rejected by the flattened kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    #[serde(rename = "type")]
    pub record_type: EntryRecordType,
    pub id: String,
    pub parent_id: Option<String>,
    pub ts: String,
    #[serde(flatten)]
    pub kind: SessionEntryKind,
}

impl SessionEntry {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        parent_id: Option<impl Into<String>>,
        ts: impl Into<String>,
        kind: SessionEntryKind,
    ) -> Self {
        Self {
            record_type: EntryRecordType::Entry,
            id: id.into(),
            parent_id: parent_id.map(Into::into),
            ts: ts.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum SessionEntryKind {
    UserText {
        text: String,
    },
    AssistantText {
        text: String,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
    Reasoning {
        provider_id: String,
        payload: Value,
    },
}

impl From<Turn> for SessionEntryKind {
    fn from(turn: Turn) -> Self {
        match turn {
            Turn::UserText { text } => Self::UserText { text },
            Turn::AssistantText { text } => Self::AssistantText { text },
            Turn::ToolCallRequest {
                call_id,
                tool_name,
                arguments,
            } => Self::ToolCall {
                call_id,
                tool_name,
                arguments,
            },
            Turn::ToolCallResult {
                call_id,
                tool_name,
                content,
                is_error,
            } => Self::ToolResult {
                call_id,
                tool_name,
                content,
                is_error,
            },
            Turn::Reasoning { provider_id, payload } => Self::Reasoning { provider_id, payload },
        }
    }
}

impl From<SessionEntryKind> for Turn {
    fn from(kind: SessionEntryKind) -> Self {
        match kind {
            SessionEntryKind::UserText { text } => Self::UserText { text },
            SessionEntryKind::AssistantText { text } => Self::AssistantText { text },
            SessionEntryKind::ToolCall {
                call_id,
                tool_name,
                arguments,
            } => Self::ToolCallRequest {
                call_id,
                tool_name,
                arguments,
            },
            SessionEntryKind::ToolResult {
                call_id,
                tool_name,
                content,
                is_error,
            } => Self::ToolCallResult {
                call_id,
                tool_name,
                content,
                is_error,
            },
            SessionEntryKind::Reasoning { provider_id, payload } => Self::Reasoning { provider_id, payload },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum JsonLine {
    Session(SessionHeader),
    Entry(SessionEntry),
}
