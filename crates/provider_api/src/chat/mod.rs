//! OpenAI-compatible chat completions (`POST {base}/chat/completions`), used
//! for GLM and any server speaking the same dialect.

pub mod events;
pub mod payload;

use std::collections::BTreeMap;

use agent_provider::CancelSignal;
use futures_util::stream::BoxStream;
use futures_util::{future, StreamExt};

pub use events::{ChatChunk, ChatStreamEvent};
pub use payload::ChatRequest;

use crate::client::{header_map, merge_extra_headers, required_token, streaming_headers, ApiClient, RequestAuth};
use crate::error::ApiError;

/// GLM coding-plan endpoint base.
pub const DEFAULT_CHAT_BASE_URL: &str = "https://api.z.ai/api/coding/paas/v4";

pub type ChatEventStream = BoxStream<'static, Result<ChatStreamEvent, ApiError>>;

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub base_url: String,
    pub user_agent: Option<String>,
    pub extra_headers: BTreeMap<String, String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CHAT_BASE_URL.to_string(),
            user_agent: None,
            extra_headers: BTreeMap::new(),
        }
    }
}

impl ChatConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim().trim_end_matches('/');
        let base = if base.is_empty() {
            DEFAULT_CHAT_BASE_URL
        } else {
            base
        };
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/chat/completions")
        }
    }
}

pub fn build_headers(
    config: &ChatConfig,
    auth: &RequestAuth,
) -> Result<BTreeMap<String, String>, ApiError> {
    let token = required_token(auth)?;
    let mut headers = streaming_headers(config.user_agent.as_deref());
    headers.insert("authorization".to_owned(), format!("Bearer {token}"));
    merge_extra_headers(&mut headers, &config.extra_headers);
    Ok(headers)
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    api: ApiClient,
    config: ChatConfig,
}

impl ChatClient {
    pub fn new(api: ApiClient, config: ChatConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub async fn stream(
        &self,
        request: &ChatRequest,
        auth: &RequestAuth,
        cancel: &CancelSignal,
    ) -> Result<ChatEventStream, ApiError> {
        let headers = header_map(&build_headers(&self.config, auth)?)?;
        let mut payload = request.clone();
        payload.stream = true;
        let frames = self
            .api
            .post_event_stream(&self.config.endpoint(), headers, &payload, cancel)
            .await?;

        Ok(frames
            .filter_map(|frame| {
                future::ready(
                    frame
                        .and_then(|frame| events::decode_event(&frame))
                        .transpose(),
                )
            })
            .boxed())
    }
}
