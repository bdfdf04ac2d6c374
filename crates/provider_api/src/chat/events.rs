use agent_provider::sse::SseFrame;
use serde::Deserialize;

use crate::error::{ApiError, ErrorBody};

/// One `data:` chunk of a streamed chat completion.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub delta: ChatDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatDelta {
    #[serde(default)]
    pub content: Option<String>,
    /// Reasoning text streamed by GLM and other compatible servers.
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ChatToolCallDelta>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatToolCallDelta {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: ChatFunctionDelta,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Decoded stream item.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamEvent {
    Chunk(ChatChunk),
    /// The `data: [DONE]` terminator.
    Done,
}

#[derive(Debug, Deserialize)]
struct InlineError {
    error: ErrorBody,
}

/// Decodes one SSE frame. Servers may embed an `{"error": ..}` object in the
/// stream instead of failing the HTTP status; that becomes a stream failure.
pub fn decode_event(frame: &SseFrame) -> Result<Option<ChatStreamEvent>, ApiError> {
    let data = frame.data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if frame.is_done_sentinel() {
        return Ok(Some(ChatStreamEvent::Done));
    }

    if let Ok(inline) = serde_json::from_str::<InlineError>(data) {
        return Err(ApiError::StreamFailed {
            code: inline.error.code.clone(),
            message: inline
                .error
                .message_or_fallback()
                .unwrap_or_else(|| "chat completion failed".to_owned()),
        });
    }

    serde_json::from_str::<ChatChunk>(data)
        .map(|chunk| Some(ChatStreamEvent::Chunk(chunk)))
        .map_err(|error| ApiError::MalformedEvent(format!("{error}: {data}")))
}
