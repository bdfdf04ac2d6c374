use std::collections::BTreeMap;

use agent_provider::{CancelSignal, DeltaStream, ProviderError, ProviderProfile, ProviderRequest, StreamDelta, Turn};
use futures_util::{stream, StreamExt, TryStreamExt};
use provider_api::codex::payload::{
    function_call_item, function_call_output_item, function_tool, message_item,
};
use provider_api::codex::{CodexClient, CodexConfig, CodexRequest, CodexResponseStatus, CodexStreamEvent};
use provider_api::ApiClient;
use serde_json::Value;

use crate::auth::CredentialSource;
use crate::dispatch::open_with_reauth;
use crate::stream::{decode_events, EventDecoder};
use crate::{resolve_model, ProviderSettings};

/// Codex Responses API adapter (OAuth bearer token plus account id).
#[derive(Debug, Clone)]
pub struct CodexAdapter {
    client: CodexClient,
    profile: ProviderProfile,
    credentials: CredentialSource,
}

impl CodexAdapter {
    pub(crate) fn new(
        api: ApiClient,
        settings: &ProviderSettings,
        profile: ProviderProfile,
        credentials: CredentialSource,
    ) -> Self {
        let mut config = CodexConfig::default();
        if let Some(base_url) = &settings.base_url {
            config = config.with_base_url(base_url.clone());
        }
        if let Some(session_id) = &settings.session_id {
            config = config.with_session_id(session_id.clone());
        }
        if let Some(effort) = &settings.reasoning_effort {
            config = config.with_reasoning_effort(effort.clone());
        }
        Self {
            client: CodexClient::new(api, config),
            profile,
            credentials,
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
            let payload = build_request(&request, &adapter.profile);
            let client = &adapter.client;
            let payload = &payload;
            let cancel = &cancel;
            let events = open_with_reauth(&adapter.credentials, cancel, move |auth| async move {
                client.stream(payload, &auth, cancel).await
            })
            .await?;
            Ok::<_, ProviderError>(decode_events(events, CodexDecoder::default()))
        })
        .try_flatten()
        .boxed()
    }
}

/// Maps the transcript onto Responses `input` items.
pub(crate) fn build_request(request: &ProviderRequest, profile: &ProviderProfile) -> CodexRequest {
    let mut input = Vec::with_capacity(request.transcript.len());
    for turn in &request.transcript {
        match turn {
            Turn::UserText { text } => input.push(message_item("user", text)),
            Turn::AssistantText { text } if !text.is_empty() => input.push(message_item("assistant", text)),
            Turn::AssistantText { .. } => {}
            Turn::ToolCallRequest {
                call_id,
                tool_name,
                arguments,
            } => input.push(function_call_item(call_id, tool_name, arguments)),
            Turn::ToolCallResult { call_id, content, .. } => {
                input.push(function_call_output_item(call_id, content));
            }
            Turn::Reasoning { provider_id, payload } if *provider_id == profile.provider_id => {
                input.push(payload.clone());
            }
            Turn::Reasoning { .. } => {}
        }
    }

    let tools = request
        .tools
        .iter()
        .map(|tool| function_tool(&tool.name, &tool.description, &tool.input_schema))
        .collect();

    CodexRequest::new(resolve_model(request, profile), input, Some(request.instructions.clone())).with_tools(tools)
}

#[derive(Debug, Default)]
struct CallProgress {
    announced: bool,
    streamed_arguments: bool,
}

#[derive(Debug, Default)]
pub(crate) struct CodexDecoder {
    calls: BTreeMap<usize, CallProgress>,
    saw_text: bool,
}

impl EventDecoder<CodexStreamEvent> for CodexDecoder {
    fn decode(&mut self, event: CodexStreamEvent) -> Result<Vec<StreamDelta>, ProviderError> {
        Ok(match event {
            CodexStreamEvent::OutputTextDelta { delta } => {
                if delta.is_empty() {
                    Vec::new()
                } else {
                    self.saw_text = true;
                    vec![StreamDelta::TextDelta { text: delta }]
                }
            }
            CodexStreamEvent::ReasoningSummaryTextDelta { delta } => {
                vec![StreamDelta::ReasoningText { text: delta }]
            }
            CodexStreamEvent::FunctionCallAdded {
                output_index,
                item_id,
                call_id,
                name,
            } => {
                self.calls.entry(output_index).or_default().announced = true;
                vec![StreamDelta::ToolCallDelta {
                    index: output_index,
                    call_id: call_id.or(item_id),
                    tool_name: name,
                    arguments: String::new(),
                }]
            }
            CodexStreamEvent::FunctionCallArgumentsDelta {
                output_index, delta, ..
            } => {
                self.calls.entry(output_index).or_default().streamed_arguments = true;
                vec![StreamDelta::ToolCallDelta {
                    index: output_index,
                    call_id: None,
                    tool_name: None,
                    arguments: delta,
                }]
            }
            CodexStreamEvent::OutputItemDone { output_index, item } => self.item_done(output_index, item),
            CodexStreamEvent::ResponseCompleted { status } => match status {
                CodexResponseStatus::Completed | CodexResponseStatus::Incomplete => {
                    vec![StreamDelta::TurnComplete {
                        stop_reason: Some(status.as_str().to_string()),
                    }]
                }
                other => {
                    return Err(ProviderError::Stream {
                        message: format!("response ended with status '{}'", other.as_str()),
                    })
                }
            },
            CodexStreamEvent::ResponseFailed { message } => {
                return Err(ProviderError::Stream {
                    message: message.unwrap_or_else(|| "response failed".to_string()),
                })
            }
            CodexStreamEvent::Error { code, message } => {
                let message = message.unwrap_or_else(|| "stream error".to_string());
                return Err(ProviderError::Stream {
                    message: match code {
                        Some(code) => format!("{message} ({code})"),
                        None => message,
                    },
                });
            }
        })
    }

    fn finish(&mut self) -> Result<Vec<StreamDelta>, ProviderError> {
        Err(ProviderError::Stream {
            message: "stream closed before response.completed".to_string(),
        })
    }
}

impl CodexDecoder {
    fn item_done(&mut self, output_index: usize, mut item: Value) -> Vec<StreamDelta> {
        let item_type = item.get("type").and_then(Value::as_str).map(str::to_owned);
        match item_type.as_deref() {
            Some("reasoning") => {
                // Responses are not stored server-side, so item ids cannot be referenced later.
                if let Some(object) = item.as_object_mut() {
                    object.remove("id");
                }
                vec![StreamDelta::Reasoning { payload: item }]
            }
            Some("function_call") => {
                let progress = self.calls.entry(output_index).or_default();
                if progress.streamed_arguments {
                    return Vec::new();
                }
                let field = |key: &str| item.get(key).and_then(Value::as_str).map(str::to_owned);
                let delta = StreamDelta::ToolCallDelta {
                    index: output_index,
                    call_id: if progress.announced {
                        None
                    } else {
                        field("call_id").or_else(|| field("id"))
                    },
                    tool_name: if progress.announced { None } else { field("name") },
                    arguments: field("arguments").unwrap_or_default(),
                };
                progress.announced = true;
                progress.streamed_arguments = true;
                vec![delta]
            }
            Some("message") if !self.saw_text => {
                let text: String = item
                    .get("content")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect();
                if text.is_empty() {
                    Vec::new()
                } else {
                    self.saw_text = true;
                    vec![StreamDelta::TextDelta { text }]
                }
            }
            _ => Vec::new(),
        }
    }
}
