use agent_provider::sse::SseFrame;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;

/// Messages API stream event, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamEvent {
    MessageStart {
        #[serde(default)]
        message: Value,
    },
    ContentBlockStart {
        index: usize,
        content_block: Value,
    },
    ContentBlockDelta {
        index: usize,
        delta: AnthropicDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaBody,
    },
    MessageStop,
    Ping,
    Error {
        error: AnthropicErrorBody,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnthropicErrorBody {
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Decodes one SSE frame; unknown event types yield `None`.
pub fn decode_event(frame: &SseFrame) -> Result<Option<AnthropicStreamEvent>, ApiError> {
    let data = frame.data.trim();
    if data.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(data)
        .map_err(|error| ApiError::MalformedEvent(format!("{error}: {data}")))?;
    let known = matches!(
        value.get("type").and_then(Value::as_str),
        Some(
            "message_start"
                | "content_block_start"
                | "content_block_delta"
                | "content_block_stop"
                | "message_delta"
                | "message_stop"
                | "ping"
                | "error"
        )
    );
    if !known {
        tracing::debug!(event = frame.event_name(), "ignoring unknown anthropic event");
        return Ok(None);
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|error| ApiError::MalformedEvent(format!("{error}: {data}")))
}

/// Maps an `error` event to the stream failure it represents.
pub fn stream_failure(event: &AnthropicStreamEvent) -> Option<ApiError> {
    match event {
        AnthropicStreamEvent::Error { error } => Some(ApiError::StreamFailed {
            code: error.error_type.clone(),
            message: error
                .message
                .clone()
                .unwrap_or_else(|| "Anthropic stream error".to_owned()),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use agent_provider::sse::SseFrameParser;
    use assert_matches::assert_matches;

    use super::{decode_event, stream_failure, AnthropicDelta, AnthropicStreamEvent};

    fn decode_all(raw: &str) -> Vec<AnthropicStreamEvent> {
        SseFrameParser::parse_all(raw)
            .iter()
            .filter_map(|frame| decode_event(frame).expect("decodes"))
            .collect()
    }

    #[test]
    fn decodes_tool_use_lifecycle() {
        let events = decode_all(concat!(
            "event: content_block_start\n",
            "data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"read_file\",\"input\":{}}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"path\\\":\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":5}}\n\n",
        ));

        assert_eq!(events.len(), 3);
        assert_matches!(&events[0], AnthropicStreamEvent::ContentBlockStart { index: 1, content_block } if content_block["name"] == "read_file");
        assert_matches!(
            &events[1],
            AnthropicStreamEvent::ContentBlockDelta { index: 1, delta: AnthropicDelta::InputJsonDelta { partial_json } } if partial_json == "{\"path\":"
        );
        assert_matches!(&events[2], AnthropicStreamEvent::MessageDelta { delta } if delta.stop_reason.as_deref() == Some("tool_use"));
    }

    #[test]
    fn unknown_event_types_and_deltas_are_tolerated() {
        let events = decode_all(concat!(
            "data: {\"type\":\"brand_new_event\"}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"citations_delta\"}}\n\n",
        ));
        assert_eq!(
            events,
            vec![AnthropicStreamEvent::ContentBlockDelta {
                index: 0,
                delta: AnthropicDelta::Unsupported
            }]
        );
    }

    #[test]
    fn error_event_becomes_stream_failure() {
        let events = decode_all(
            "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        );
        let error = stream_failure(&events[0]).expect("failure");
        assert_eq!(error.to_string(), "stream failed (overloaded_error): Overloaded");
        assert!(error.is_transient());
    }
}
