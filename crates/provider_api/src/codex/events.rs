use agent_provider::sse::SseFrame;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

/// Terminal state reported by `response.completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodexResponseStatus {
    Completed,
    Incomplete,
    Failed,
    Cancelled,
    Queued,
    InProgress,
}

impl CodexResponseStatus {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "completed" => Self::Completed,
            "incomplete" => Self::Incomplete,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            "queued" => Self::Queued,
            "in_progress" => Self::InProgress,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
        }
    }
}

/// Normalized Responses stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum CodexStreamEvent {
    OutputTextDelta {
        delta: String,
    },
    ReasoningSummaryTextDelta {
        delta: String,
    },
    /// A `function_call` output item was opened.
    FunctionCallAdded {
        output_index: usize,
        item_id: Option<String>,
        call_id: Option<String>,
        name: Option<String>,
    },
    FunctionCallArgumentsDelta {
        output_index: usize,
        item_id: Option<String>,
        delta: String,
    },
    /// Any output item finished; `item` is the complete item payload.
    OutputItemDone {
        output_index: usize,
        item: Value,
    },
    ResponseCompleted {
        status: CodexResponseStatus,
    },
    ResponseFailed {
        message: Option<String>,
    },
    Error {
        code: Option<String>,
        message: Option<String>,
    },
}

/// Decodes one SSE frame. Unknown event types and keep-alives yield `None`.
pub fn decode_event(frame: &SseFrame) -> Result<Option<CodexStreamEvent>, ApiError> {
    let data = frame.data.trim();
    if data.is_empty() || frame.is_done_sentinel() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(data)
        .map_err(|error| ApiError::MalformedEvent(format!("{error}: {data}")))?;
    Ok(map_event(&value))
}

fn map_event(value: &Value) -> Option<CodexStreamEvent> {
    let event_type = value.get("type")?.as_str()?;

    match event_type {
        "response.output_text.delta" => Some(CodexStreamEvent::OutputTextDelta {
            delta: str_field(value, "delta").unwrap_or_default(),
        }),
        "response.reasoning_summary_text.delta" => {
            Some(CodexStreamEvent::ReasoningSummaryTextDelta {
                delta: str_field(value, "delta").unwrap_or_default(),
            })
        }
        "response.output_item.added" => {
            let item = value.get("item")?;
            if item.get("type").and_then(Value::as_str) != Some("function_call") {
                return None;
            }
            Some(CodexStreamEvent::FunctionCallAdded {
                output_index: output_index(value),
                item_id: str_field(item, "id"),
                call_id: str_field(item, "call_id"),
                name: str_field(item, "name"),
            })
        }
        "response.function_call_arguments.delta" => {
            Some(CodexStreamEvent::FunctionCallArgumentsDelta {
                output_index: output_index(value),
                item_id: str_field(value, "item_id"),
                delta: str_field(value, "delta").unwrap_or_default(),
            })
        }
        "response.output_item.done" => Some(CodexStreamEvent::OutputItemDone {
            output_index: output_index(value),
            item: value.get("item").cloned().unwrap_or(Value::Null),
        }),
        "response.completed" | "response.done" => {
            let status = value
                .get("response")
                .and_then(|response| response.get("status"))
                .and_then(Value::as_str)
                .and_then(CodexResponseStatus::parse)
                .unwrap_or(CodexResponseStatus::Completed);
            Some(CodexStreamEvent::ResponseCompleted { status })
        }
        "response.failed" => Some(CodexStreamEvent::ResponseFailed {
            message: value
                .get("response")
                .and_then(|response| response.get("error"))
                .and_then(|error| str_field(error, "message")),
        }),
        "error" => Some(CodexStreamEvent::Error {
            code: str_field(value, "code"),
            message: str_field(value, "message"),
        }),
        _ => None,
    }
}

/// Maps failure events to the error they terminate the stream with.
pub fn stream_failure(event: &CodexStreamEvent) -> Option<ApiError> {
    match event {
        CodexStreamEvent::ResponseFailed { message } => Some(ApiError::StreamFailed {
            code: None,
            message: message
                .clone()
                .unwrap_or_else(|| "Codex response failed".to_owned()),
        }),
        CodexStreamEvent::Error { code, message } => Some(ApiError::StreamFailed {
            code: code.clone(),
            message: message
                .clone()
                .or_else(|| code.clone())
                .unwrap_or_else(|| "Codex error".to_owned()),
        }),
        _ => None,
    }
}

fn output_index(value: &Value) -> usize {
    value
        .get("output_index")
        .and_then(Value::as_u64)
        .and_then(|index| usize::try_from(index).ok())
        .unwrap_or(0)
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(ToString::to_string)
}
