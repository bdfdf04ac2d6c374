use agent_provider::{CancelSignal, DeltaStream, ProviderError, ProviderProfile, ProviderRequest, StreamDelta, Turn};
use futures_util::{stream, StreamExt, TryStreamExt};
use provider_api::chat::payload::function_tool;
use provider_api::chat::{ChatClient, ChatConfig, ChatRequest, ChatStreamEvent};
use provider_api::codex::payload::arguments_string;
use provider_api::ApiClient;

use crate::auth::CredentialSource;
use crate::dispatch::open_with_reauth;
use crate::stream::{decode_events, EventDecoder};
use crate::{resolve_model, ProviderSettings, DEFAULT_MAX_TOKENS};

/// OpenAI-compatible chat-completions adapter (GLM by default).
#[derive(Debug, Clone)]
pub struct ChatCompletionsAdapter {
    client: ChatClient,
    profile: ProviderProfile,
    credentials: CredentialSource,
    max_tokens: u32,
}

impl ChatCompletionsAdapter {
    pub(crate) fn new(
        api: ApiClient,
        settings: &ProviderSettings,
        profile: ProviderProfile,
        credentials: CredentialSource,
    ) -> Self {
        let mut config = ChatConfig::default();
        if let Some(base_url) = &settings.base_url {
            config = config.with_base_url(base_url.clone());
        }
        Self {
            client: ChatClient::new(api, config),
            profile,
            credentials,
            max_tokens: settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
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
            let payload = build_request(&request, &adapter.profile, adapter.max_tokens);
            let client = &adapter.client;
            let payload = &payload;
            let cancel = &cancel;
            let events = open_with_reauth(&adapter.credentials, cancel, move |auth| async move {
                client.stream(payload, &auth, cancel).await
            })
            .await?;
            Ok::<_, ProviderError>(decode_events(events, ChatDecoder::default()))
        })
        .try_flatten()
        .boxed()
    }
}

/// Instructions become a leading `system` message. Reasoning payloads are
/// never sent: this dialect has no field to carry them.
pub(crate) fn build_request(request: &ProviderRequest, profile: &ProviderProfile, max_tokens: u32) -> ChatRequest {
    let mut payload = ChatRequest::new(resolve_model(request, profile));
    payload.max_tokens = Some(max_tokens);

    let instructions = request.instructions.trim();
    if !instructions.is_empty() {
        payload.push_system(instructions);
    }

    for turn in &request.transcript {
        match turn {
            Turn::UserText { text } => payload.push_user(text),
            Turn::AssistantText { text } if !text.is_empty() => payload.push_assistant_text(text),
            Turn::AssistantText { .. } | Turn::Reasoning { .. } => {}
            Turn::ToolCallRequest {
                call_id,
                tool_name,
                arguments,
            } => payload.push_tool_call(call_id, tool_name, &arguments_string(arguments)),
            Turn::ToolCallResult { call_id, content, .. } => payload.push_tool_result(call_id, content),
        }
    }

    let tools = request
        .tools
        .iter()
        .map(|tool| function_tool(&tool.name, &tool.description, &tool.input_schema))
        .collect();
    payload.with_tools(tools)
}

#[derive(Debug, Default)]
pub(crate) struct ChatDecoder {
    finish_reason: Option<String>,
}

impl EventDecoder<ChatStreamEvent> for ChatDecoder {
    fn decode(&mut self, event: ChatStreamEvent) -> Result<Vec<StreamDelta>, ProviderError> {
        let chunk = match event {
            ChatStreamEvent::Done => {
                return Ok(vec![StreamDelta::TurnComplete {
                    stop_reason: self.finish_reason.take(),
                }])
            }
            ChatStreamEvent::Chunk(chunk) => chunk,
        };

        let mut deltas = Vec::new();
        // Only the first choice is requested; ignore any others.
        for choice in chunk.choices.into_iter().filter(|choice| choice.index == 0) {
            if let Some(text) = choice.delta.reasoning_content.filter(|text| !text.is_empty()) {
                deltas.push(StreamDelta::ReasoningText { text });
            }
            if let Some(text) = choice.delta.content.filter(|text| !text.is_empty()) {
                deltas.push(StreamDelta::TextDelta { text });
            }
            for call in choice.delta.tool_calls {
                deltas.push(StreamDelta::ToolCallDelta {
                    index: call.index,
                    call_id: call.id.filter(|id| !id.is_empty()),
                    tool_name: call.function.name.filter(|name| !name.is_empty()),
                    arguments: call.function.arguments.unwrap_or_default(),
                });
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }
        Ok(deltas)
    }

    /// Some servers close the stream after the final chunk without `[DONE]`.
    fn finish(&mut self) -> Result<Vec<StreamDelta>, ProviderError> {
        match self.finish_reason.take() {
            Some(reason) => Ok(vec![StreamDelta::TurnComplete {
                stop_reason: Some(reason),
            }]),
            None => Err(ProviderError::Stream {
                message: "stream closed before [DONE]".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use agent_provider::{ProviderError, ProviderProfile, ProviderRequest, StreamDelta, ToolDescriptor, Turn};
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use provider_api::chat::events::{ChatChoice, ChatDelta, ChatFunctionDelta, ChatToolCallDelta};
    use provider_api::chat::{ChatChunk, ChatStreamEvent};
    use serde_json::json;

    use super::{build_request, ChatDecoder};
    use crate::stream::EventDecoder;

    fn profile() -> ProviderProfile {
        ProviderProfile {
            provider_id: "glm".to_string(),
            default_model_id: "glm-4.6".to_string(),
        }
    }

    #[test]
    fn system_message_leads_and_reasoning_is_dropped() {
        let request = ProviderRequest {
            model_id: String::new(),
            instructions: "sys".to_string(),
            transcript: vec![
                Turn::user("hi"),
                Turn::Reasoning {
                    provider_id: "glm".to_string(),
                    payload: json!({}),
                },
                Turn::assistant("checking"),
                Turn::ToolCallRequest {
                    call_id: "call_1".to_string(),
                    tool_name: "grep_files".to_string(),
                    arguments: json!({"pattern": "fn"}),
                },
                Turn::ToolCallResult {
                    call_id: "call_1".to_string(),
                    tool_name: "grep_files".to_string(),
                    content: "src/lib.rs:1".to_string(),
                    is_error: false,
                },
            ],
            tools: vec![ToolDescriptor::native("grep_files", "Search", json!({"type": "object"}))],
        };

        let payload = build_request(&request, &profile(), 2048);

        let roles: Vec<_> = payload
            .messages
            .iter()
            .map(|message| message["role"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(roles, ["system", "user", "assistant", "tool"]);
        assert_eq!(payload.messages[2]["content"], "checking");
        assert_eq!(payload.messages[2]["tool_calls"][0]["function"]["arguments"], r#"{"pattern":"fn"}"#);
        assert_eq!(payload.tool_choice.as_deref(), Some("auto"));
        assert_eq!(payload.max_tokens, Some(2048));
    }

    fn chunk(delta: ChatDelta, finish_reason: Option<&str>) -> ChatStreamEvent {
        ChatStreamEvent::Chunk(ChatChunk {
            choices: vec![ChatChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
        })
    }

    #[test]
    fn decoder_streams_tool_call_fragments_then_completes() {
        let mut decoder = ChatDecoder::default();
        let mut deltas = decoder
            .decode(chunk(
                ChatDelta {
                    tool_calls: vec![ChatToolCallDelta {
                        index: 0,
                        id: Some("call_1".to_string()),
                        function: ChatFunctionDelta {
                            name: Some("list_dir".to_string()),
                            arguments: Some(String::new()),
                        },
                    }],
                    ..ChatDelta::default()
                },
                None,
            ))
            .expect("decodes");
        deltas.extend(
            decoder
                .decode(chunk(
                    ChatDelta {
                        tool_calls: vec![ChatToolCallDelta {
                            index: 0,
                            id: None,
                            function: ChatFunctionDelta {
                                name: None,
                                arguments: Some("{}".to_string()),
                            },
                        }],
                        ..ChatDelta::default()
                    },
                    Some("tool_calls"),
                ))
                .expect("decodes"),
        );
        deltas.extend(decoder.decode(ChatStreamEvent::Done).expect("decodes"));

        assert_eq!(deltas.len(), 3);
        assert_eq!(
            deltas[1],
            StreamDelta::ToolCallDelta {
                index: 0,
                call_id: None,
                tool_name: None,
                arguments: "{}".to_string(),
            }
        );
        assert_eq!(
            deltas[2],
            StreamDelta::TurnComplete {
                stop_reason: Some("tool_calls".to_string())
            }
        );
    }

    #[test]
    fn missing_done_marker_requires_finish_reason() {
        let mut decoder = ChatDecoder::default();
        assert_matches!(decoder.finish(), Err(ProviderError::Stream { .. }));

        decoder
            .decode(chunk(
                ChatDelta {
                    content: Some("bye".to_string()),
                    ..ChatDelta::default()
                },
                Some("stop"),
            ))
            .expect("decodes");
        assert_eq!(
            decoder.finish().expect("completes"),
            vec![StreamDelta::TurnComplete {
                stop_reason: Some("stop".to_string())
            }]
        );
    }
}
