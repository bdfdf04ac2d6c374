//! Provider-neutral contract shared by the orchestrator, provider adapters, and
//! tool sources.
//!
//! This crate defines the transcript model (`Turn`), tool descriptors, the
//! streamed delta model every provider adapter decodes into, and the
//! `ModelProvider` capability trait. It also owns two small streaming
//! primitives that several transports share: cooperative cancellation
//! (`cancel`) and incremental server-sent-event framing (`sse`).
//!
//! It intentionally contains no HTTP, credential, or provider payload code.

pub mod cancel;
pub mod sse;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use cancel::{await_or_cancel, is_cancelled, new_cancel_signal, CancelSignal, Cancelled};

/// One unit of model-facing conversation content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    UserText {
        text: String,
    },
    AssistantText {
        text: String,
    },
    ToolCallRequest {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolCallResult {
        call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
    /// Opaque reasoning state that must be echoed back verbatim to the
    /// provider that produced it.
    Reasoning {
        provider_id: String,
        payload: Value,
    },
}

impl Turn {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::UserText { text: text.into() }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::AssistantText { text: text.into() }
    }

    /// Returns the call identifier for tool request/result turns.
    #[must_use]
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::ToolCallRequest { call_id, .. } | Self::ToolCallResult { call_id, .. } => {
                Some(call_id)
            }
            _ => None,
        }
    }
}

/// Where a tool implementation lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolOrigin {
    Native,
    Mcp { server_id: String },
}

impl std::fmt::Display for ToolOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => f.write_str("native"),
            Self::Mcp { server_id } => write!(f, "mcp:{server_id}"),
        }
    }
}

/// Tool exposed to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub origin: ToolOrigin,
}

impl ToolDescriptor {
    #[must_use]
    pub fn native(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            origin: ToolOrigin::Native,
        }
    }
}

/// Fully assembled tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// Input for one provider request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub model_id: String,
    pub instructions: String,
    pub transcript: Vec<Turn>,
    pub tools: Vec<ToolDescriptor>,
}

/// Incremental piece of a streamed model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    /// Assistant text to surface immediately.
    TextDelta { text: String },
    /// Human-readable reasoning summary; display only, never replayed.
    ReasoningText { text: String },
    /// Fragment of a tool call. Fragments sharing `index` belong to the same
    /// call; `call_id` and `tool_name` arrive at least once per index.
    ToolCallDelta {
        index: usize,
        call_id: Option<String>,
        tool_name: Option<String>,
        arguments: String,
    },
    /// Opaque reasoning payload to round-trip on the next request.
    Reasoning { payload: Value },
    /// The model finished its turn.
    TurnComplete { stop_reason: Option<String> },
}

/// Failure raised while issuing or decoding a provider request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("transport failure: {message}")]
    Transport { message: String },
    #[error("authentication rejected: {message}")]
    Auth { message: String },
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("provider reported failure: {message}")]
    Stream { message: String },
    #[error("malformed provider stream: {message}")]
    Decode { message: String },
    #[error("request was cancelled")]
    Cancelled,
}

impl ProviderError {
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

impl From<Cancelled> for ProviderError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Lazy, finite, non-restartable sequence of deltas for one request.
pub type DeltaStream = BoxStream<'static, Result<StreamDelta, ProviderError>>;

/// Identity of a provider and its default model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub default_model_id: String,
}

/// Capability interface implemented by every provider adapter.
pub trait ModelProvider: Send + Sync {
    fn profile(&self) -> ProviderProfile;

    /// Starts one request. Nothing is sent until the stream is first polled.
    fn send(&self, request: ProviderRequest, cancel: CancelSignal) -> DeltaStream;
}

#[cfg(test)]
mod tests {
    use futures_util::{stream, StreamExt};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    struct MinimalProvider;

    impl ModelProvider for MinimalProvider {
        fn profile(&self) -> ProviderProfile {
            ProviderProfile {
                provider_id: "minimal".to_string(),
                default_model_id: "minimal-model".to_string(),
            }
        }

        fn send(&self, request: ProviderRequest, _cancel: CancelSignal) -> DeltaStream {
            let echo = format!("{} turns", request.transcript.len());
            stream::iter(vec![
                Ok(StreamDelta::TextDelta { text: echo }),
                Ok(StreamDelta::TurnComplete { stop_reason: None }),
            ])
            .boxed()
        }
    }

    #[test]
    fn turn_serializes_with_snake_case_kind_tag() {
        let turn = Turn::ToolCallRequest {
            call_id: "call-1".to_string(),
            tool_name: "list_dir".to_string(),
            arguments: json!({"path": "."}),
        };

        let value = serde_json::to_value(&turn).expect("turn serializes");
        assert_eq!(value["kind"], "tool_call_request");
        assert_eq!(value["arguments"]["path"], ".");

        let back: Turn = serde_json::from_value(value).expect("turn deserializes");
        assert_eq!(back, turn);
    }

    #[test]
    fn call_id_is_exposed_only_for_tool_turns() {
        assert_eq!(Turn::user("hi").call_id(), None);
        assert_eq!(
            Turn::ToolCallResult {
                call_id: "c".to_string(),
                tool_name: "t".to_string(),
                content: String::new(),
                is_error: false,
            }
            .call_id(),
            Some("c")
        );
    }

    #[test]
    fn tool_origin_display_names_mcp_server() {
        assert_eq!(ToolOrigin::Native.to_string(), "native");
        assert_eq!(
            ToolOrigin::Mcp {
                server_id: "docs".to_string()
            }
            .to_string(),
            "mcp:docs"
        );
    }

    #[test]
    fn cancelled_converts_into_provider_error() {
        assert_eq!(ProviderError::from(Cancelled), ProviderError::Cancelled);
        assert!(ProviderError::auth("expired").is_auth());
        assert!(!ProviderError::transport("reset").is_auth());
    }

    #[tokio::test]
    async fn provider_send_yields_deltas_in_order() {
        let provider = MinimalProvider;
        let request = ProviderRequest {
            model_id: "minimal-model".to_string(),
            instructions: String::new(),
            transcript: vec![Turn::user("hello")],
            tools: Vec::new(),
        };

        let deltas: Vec<_> = provider
            .send(request, new_cancel_signal())
            .collect::<Vec<_>>()
            .await;

        assert_eq!(
            deltas,
            vec![
                Ok(StreamDelta::TextDelta {
                    text: "1 turns".to_string()
                }),
                Ok(StreamDelta::TurnComplete { stop_reason: None }),
            ]
        );
    }
}
