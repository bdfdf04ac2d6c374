use std::collections::HashMap;

use agent_provider::{CancelSignal, DeltaStream, ProviderError, ProviderProfile, ProviderRequest, StreamDelta, Turn};
use futures_util::{stream, StreamExt, TryStreamExt};
use provider_api::anthropic::payload::{text_block, tool_definition, tool_result_block, tool_use_block};
use provider_api::anthropic::{AnthropicClient, AnthropicConfig, AnthropicDelta, AnthropicRequest, AnthropicRole, AnthropicStreamEvent};
use provider_api::ApiClient;
use serde_json::{json, Value};

use crate::auth::CredentialSource;
use crate::dispatch::open_with_reauth;
use crate::stream::{decode_events, EventDecoder};
use crate::{resolve_model, ProviderSettings, DEFAULT_MAX_TOKENS};

/// Anthropic Messages API adapter.
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    client: AnthropicClient,
    profile: ProviderProfile,
    credentials: CredentialSource,
    max_tokens: u32,
    thinking_budget: Option<u32>,
}

impl AnthropicAdapter {
    pub(crate) fn new(
        api: ApiClient,
        settings: &ProviderSettings,
        profile: ProviderProfile,
        credentials: CredentialSource,
    ) -> Self {
        let mut config = AnthropicConfig::default();
        if let Some(base_url) = &settings.base_url {
            config = config.with_base_url(base_url.clone());
        }
        Self {
            client: AnthropicClient::new(api, config),
            profile,
            credentials,
            max_tokens: settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            thinking_budget: settings.reasoning_effort.as_deref().and_then(thinking_budget),
        }
    }

    pub(crate) fn credentials(&self) -> &CredentialSource {
        &self.credentials
    }

    pub(crate) fn profile(&self) -> ProviderProfile {
        self.profile.clone()
    }

    pub(crate) fn send(&self, request: ProviderRequest, cancel: CancelSignal) -> DeltaStream {
        let adapter = self.clone();
        stream::once(async move {
            let payload = build_request(&request, &adapter.profile, adapter.max_tokens, adapter.thinking_budget);
            let client = &adapter.client;
            let payload = &payload;
            let cancel = &cancel;
            let events = open_with_reauth(&adapter.credentials, cancel, move |auth| async move {
                client.stream(payload, &auth, cancel).await
            })
            .await?;
            Ok::<_, ProviderError>(decode_events(events, AnthropicDecoder::default()))
        })
        .try_flatten()
        .boxed()
    }
}

/// Extended-thinking budget for a named effort level.
fn thinking_budget(effort: &str) -> Option<u32> {
    match effort.trim().to_ascii_lowercase().as_str() {
        "minimal" => Some(1_024),
        "low" => Some(2_048),
        "medium" => Some(8_192),
        "high" | "xhigh" => Some(16_384),
        _ => None,
    }
}

/// Maps the transcript onto Messages API blocks. Instructions go to the
/// `system` field; leading assistant messages are dropped because the API
/// requires the conversation to open with a user message.
pub(crate) fn build_request(
    request: &ProviderRequest,
    profile: &ProviderProfile,
    max_tokens: u32,
    thinking_budget: Option<u32>,
) -> AnthropicRequest {
    let max_tokens = match thinking_budget {
        Some(budget) => max_tokens.max(budget.saturating_add(1_024)),
        None => max_tokens,
    };
    let mut payload = AnthropicRequest::new(resolve_model(request, profile), max_tokens);
    if let Some(budget) = thinking_budget {
        payload = payload.with_thinking_budget(budget);
    }

    let instructions = request.instructions.trim();
    if !instructions.is_empty() {
        payload.system = Some(instructions.to_string());
    }

    for turn in &request.transcript {
        match turn {
            Turn::UserText { text } => payload.push_block(AnthropicRole::User, text_block(text)),
            Turn::AssistantText { text } if !text.is_empty() => {
                payload.push_block(AnthropicRole::Assistant, text_block(text));
            }
            Turn::AssistantText { .. } => {}
            Turn::ToolCallRequest {
                call_id,
                tool_name,
                arguments,
            } => payload.push_block(AnthropicRole::Assistant, tool_use_block(call_id, tool_name, arguments)),
            Turn::ToolCallResult {
                call_id,
                content,
                is_error,
                ..
            } => payload.push_block(AnthropicRole::User, tool_result_block(call_id, content, *is_error)),
            Turn::Reasoning { provider_id, payload: block } if *provider_id == profile.provider_id => {
                payload.push_block(AnthropicRole::Assistant, block.clone());
            }
            Turn::Reasoning { .. } => {}
        }
    }

    let leading_assistant = payload
        .messages
        .iter()
        .take_while(|message| message.role == AnthropicRole::Assistant)
        .count();
    payload.messages.drain(..leading_assistant);

    payload.tools = request
        .tools
        .iter()
        .map(|tool| tool_definition(&tool.name, &tool.description, &tool.input_schema))
        .collect();
    payload
}

#[derive(Debug)]
enum Block {
    Text,
    Thinking { thinking: String, signature: String },
    Redacted(Value),
    ToolUse,
    Other,
}

#[derive(Debug, Default)]
pub(crate) struct AnthropicDecoder {
    blocks: HashMap<usize, Block>,
    stop_reason: Option<String>,
}

impl EventDecoder<AnthropicStreamEvent> for AnthropicDecoder {
    fn decode(&mut self, event: AnthropicStreamEvent) -> Result<Vec<StreamDelta>, ProviderError> {
        Ok(match event {
            AnthropicStreamEvent::MessageStart { .. } | AnthropicStreamEvent::Ping => Vec::new(),
            AnthropicStreamEvent::ContentBlockStart { index, content_block } => self.block_start(index, content_block),
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => self.block_delta(index, delta),
            AnthropicStreamEvent::ContentBlockStop { index } => self.block_stop(index),
            AnthropicStreamEvent::MessageDelta { delta } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                Vec::new()
            }
            AnthropicStreamEvent::MessageStop => vec![StreamDelta::TurnComplete {
                stop_reason: self.stop_reason.take(),
            }],
            AnthropicStreamEvent::Error { error } => {
                return Err(ProviderError::Stream {
                    message: error.message.unwrap_or_else(|| "stream error".to_string()),
                })
            }
        })
    }

    fn finish(&mut self) -> Result<Vec<StreamDelta>, ProviderError> {
        Err(ProviderError::Stream {
            message: "stream closed before message_stop".to_string(),
        })
    }
}

impl AnthropicDecoder {
    fn block_start(&mut self, index: usize, content_block: Value) -> Vec<StreamDelta> {
        let field = |key: &str| content_block.get(key).and_then(Value::as_str).map(str::to_owned);
        match content_block.get("type").and_then(Value::as_str) {
            Some("text") => {
                self.blocks.insert(index, Block::Text);
                field("text")
                    .filter(|text| !text.is_empty())
                    .map(|text| StreamDelta::TextDelta { text })
                    .into_iter()
                    .collect()
            }
            Some("thinking") => {
                self.blocks.insert(
                    index,
                    Block::Thinking {
                        thinking: field("thinking").unwrap_or_default(),
                        signature: field("signature").unwrap_or_default(),
                    },
                );
                Vec::new()
            }
            Some("redacted_thinking") => {
                self.blocks.insert(index, Block::Redacted(content_block.clone()));
                Vec::new()
            }
            Some("tool_use") => {
                self.blocks.insert(index, Block::ToolUse);
                let input = content_block
                    .get("input")
                    .filter(|input| input.as_object().is_some_and(|object| !object.is_empty()))
                    .map(Value::to_string)
                    .unwrap_or_default();
                vec![StreamDelta::ToolCallDelta {
                    index,
                    call_id: field("id"),
                    tool_name: field("name"),
                    arguments: input,
                }]
            }
            _ => {
                self.blocks.insert(index, Block::Other);
                Vec::new()
            }
        }
    }

    fn block_delta(&mut self, index: usize, delta: AnthropicDelta) -> Vec<StreamDelta> {
        match (self.blocks.get_mut(&index), delta) {
            (_, AnthropicDelta::TextDelta { text }) if !text.is_empty() => vec![StreamDelta::TextDelta { text }],
            (Some(Block::ToolUse), AnthropicDelta::InputJsonDelta { partial_json }) => {
                vec![StreamDelta::ToolCallDelta {
                    index,
                    call_id: None,
                    tool_name: None,
                    arguments: partial_json,
                }]
            }
            (Some(Block::Thinking { thinking, .. }), AnthropicDelta::ThinkingDelta { thinking: text }) => {
                thinking.push_str(&text);
                vec![StreamDelta::ReasoningText { text }]
            }
            (Some(Block::Thinking { signature, .. }), AnthropicDelta::SignatureDelta { signature: part }) => {
                signature.push_str(&part);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn block_stop(&mut self, index: usize) -> Vec<StreamDelta> {
        match self.blocks.remove(&index) {
            Some(Block::Thinking { thinking, signature }) => vec![StreamDelta::Reasoning {
                payload: json!({ "type": "thinking", "thinking": thinking, "signature": signature }),
            }],
            Some(Block::Redacted(block)) => vec![StreamDelta::Reasoning { payload: block }],
            Some(Block::Text | Block::ToolUse | Block::Other) | None => Vec::new(),
        }
    }
}
