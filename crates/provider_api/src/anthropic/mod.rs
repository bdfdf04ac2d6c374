//! Anthropic Messages API (`POST {base}/v1/messages`).

pub mod events;
pub mod payload;

use std::collections::BTreeMap;

use agent_provider::CancelSignal;
use futures_util::stream::BoxStream;
use futures_util::{future, StreamExt};

pub use events::{AnthropicDelta, AnthropicStreamEvent};
pub use payload::{AnthropicMessage, AnthropicRequest, AnthropicRole};

use crate::client::{header_map, required_token, streaming_headers, ApiClient, AuthScheme, RequestAuth};
use crate::error::ApiError;

pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub type AnthropicEventStream = BoxStream<'static, Result<AnthropicStreamEvent, ApiError>>;

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub base_url: String,
    pub version: String,
    /// Optional `anthropic-beta` header value.
    pub beta: Option<String>,
    pub user_agent: Option<String>,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            version: ANTHROPIC_VERSION.to_string(),
            beta: None,
            user_agent: None,
        }
    }
}

impl AnthropicConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// `{base}/v1/messages`, tolerating a base that already names the path.
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim().trim_end_matches('/');
        let base = if base.is_empty() {
            DEFAULT_ANTHROPIC_BASE_URL
        } else {
            base
        };
        if base.ends_with("/v1/messages") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }
}

pub fn build_headers(
    config: &AnthropicConfig,
    auth: &RequestAuth,
) -> Result<BTreeMap<String, String>, ApiError> {
    let token = required_token(auth)?;
    let mut headers = streaming_headers(config.user_agent.as_deref());
    match auth.scheme {
        AuthScheme::ApiKey => headers.insert("x-api-key".to_owned(), token.to_owned()),
        AuthScheme::Bearer => headers.insert("authorization".to_owned(), format!("Bearer {token}")),
    };
    headers.insert("anthropic-version".to_owned(), config.version.clone());
    if let Some(beta) = config.beta.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        headers.insert("anthropic-beta".to_owned(), beta.to_owned());
    }
    Ok(headers)
}

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    api: ApiClient,
    config: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(api: ApiClient, config: AnthropicConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &AnthropicConfig {
        &self.config
    }

    pub async fn stream(
        &self,
        request: &AnthropicRequest,
        auth: &RequestAuth,
        cancel: &CancelSignal,
    ) -> Result<AnthropicEventStream, ApiError> {
        if request.messages.is_empty() {
            return Err(ApiError::InvalidRequestPayload(
                "'messages' must contain at least one message".to_owned(),
            ));
        }

        let headers = header_map(&build_headers(&self.config, auth)?)?;
        let mut payload = request.clone();
        payload.stream = true;
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
}

#[cfg(test)]
mod tests {
    use super::{build_headers, AnthropicConfig};
    use crate::client::RequestAuth;

    #[test]
    fn api_key_goes_in_x_api_key_header() {
        let headers = build_headers(&AnthropicConfig::default(), &RequestAuth::api_key("sk-ant"))
            .expect("headers");
        assert_eq!(headers.get("x-api-key").map(String::as_str), Some("sk-ant"));
        assert_eq!(
            headers.get("anthropic-version").map(String::as_str),
            Some("2023-06-01")
        );
        assert!(!headers.contains_key("authorization"));
    }

    #[test]
    fn endpoint_appends_messages_path_once() {
        let config = AnthropicConfig::default().with_base_url("http://127.0.0.1:9/");
        assert_eq!(config.endpoint(), "http://127.0.0.1:9/v1/messages");
        let config = AnthropicConfig::default().with_base_url("http://h/v1/messages");
        assert_eq!(config.endpoint(), "http://h/v1/messages");
    }
}
