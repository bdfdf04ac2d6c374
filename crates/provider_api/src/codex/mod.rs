//! Codex Responses API (`POST {base}/codex/responses`) over an OAuth bearer
//! token.

pub mod config;
pub mod events;
pub mod headers;
pub mod payload;

use agent_provider::CancelSignal;
use futures_util::stream::BoxStream;
use futures_util::{future, StreamExt};

pub use config::{normalize_codex_url, CodexConfig, DEFAULT_CODEX_BASE_URL};
pub use events::{CodexResponseStatus, CodexStreamEvent};
pub use payload::{CodexReasoning, CodexRequest};

use crate::client::{header_map, ApiClient, RequestAuth};
use crate::error::ApiError;

pub type CodexEventStream = BoxStream<'static, Result<CodexStreamEvent, ApiError>>;

#[derive(Debug, Clone)]
pub struct CodexClient {
    api: ApiClient,
    config: CodexConfig,
}

impl CodexClient {
    pub fn new(api: ApiClient, config: CodexConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &CodexConfig {
        &self.config
    }

    /// Opens the event stream for `request`.
    ///
    /// `response.failed` and `error` events surface as
    /// [`ApiError::StreamFailed`]; unknown events are dropped.
    pub async fn stream(
        &self,
        request: &CodexRequest,
        auth: &RequestAuth,
        cancel: &CancelSignal,
    ) -> Result<CodexEventStream, ApiError> {
        let headers = header_map(&headers::build_headers(&self.config, auth)?)?;
        let payload = self.request_with_transport_defaults(request);
        let frames = self
            .api
            .post_event_stream(&self.config.endpoint(), headers, &payload, cancel)
            .await?;

        Ok(frames
            .filter_map(|frame| {
                future::ready(match frame.and_then(|frame| events::decode_event(&frame)) {
                    Ok(Some(event)) => match events::stream_failure(&event) {
                        Some(error) => Some(Err(error)),
                        None => Some(Ok(event)),
                    },
                    Ok(None) => None,
                    Err(error) => Some(Err(error)),
                })
            })
            .boxed())
    }

    /// Applies the fields the endpoint requires regardless of caller input.
    pub fn request_with_transport_defaults(&self, request: &CodexRequest) -> CodexRequest {
        let mut payload = request.clone();
        payload.store = false;
        payload.stream = true;
        if payload.text.verbosity.trim().is_empty() {
            payload.text.verbosity = "medium".to_owned();
        }
        payload.include = vec!["reasoning.encrypted_content".to_owned()];
        payload.tool_choice = Some("auto".to_owned());
        if payload.prompt_cache_key.is_none() {
            payload.prompt_cache_key = self
                .config
                .session_id
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned);
        }
        if payload.reasoning.is_none() {
            if let Some(effort) = self.config.reasoning_effort.clone() {
                payload.reasoning = Some(CodexReasoning {
                    effort: Some(effort),
                    summary: None,
                });
            }
        }
        if let Some(reasoning) = payload.reasoning.as_mut() {
            if let Some(effort) = reasoning.effort.clone() {
                reasoning.effort = Some(clamp_reasoning_effort(&payload.model, &effort));
                if reasoning.summary.is_none() {
                    reasoning.summary = Some("auto".to_owned());
                }
            }
        }
        payload
    }
}

fn clamp_reasoning_effort(model_id: &str, effort: &str) -> String {
    let id = model_id.rsplit('/').next().unwrap_or(model_id);
    if (id.starts_with("gpt-5.2") || id.starts_with("gpt-5.3")) && effort == "minimal" {
        return "low".to_owned();
    }
    if id == "gpt-5.1" && effort == "xhigh" {
        return "high".to_owned();
    }
    if id == "gpt-5.1-codex-mini" {
        return if matches!(effort, "high" | "xhigh") {
            "high".to_owned()
        } else {
            "medium".to_owned()
        };
    }
    effort.to_owned()
}
