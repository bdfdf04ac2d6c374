use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use agent_provider::sse::{SseFrame, SseFrameParser};
use agent_provider::{await_or_cancel, is_cancelled, CancelSignal};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use serde::Serialize;

use crate::error::{status_error, ApiError};
use crate::user_agent::resolve_user_agent;

/// Raw SSE frames of one streamed response.
pub type FrameStream = BoxStream<'static, Result<SseFrame, ApiError>>;

/// How a token is presented to the provider.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`.
    Bearer,
    /// Provider-specific key header (`x-api-key` for Anthropic).
    ApiKey,
}

/// Credential material attached to one request.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestAuth {
    pub scheme: AuthScheme,
    pub token: String,
    pub account_id: Option<String>,
}

impl RequestAuth {
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            scheme: AuthScheme::Bearer,
            token: token.into(),
            account_id: None,
        }
    }

    #[must_use]
    pub fn api_key(token: impl Into<String>) -> Self {
        Self {
            scheme: AuthScheme::ApiKey,
            token: token.into(),
            account_id: None,
        }
    }

    #[must_use]
    pub fn with_account_id(mut self, account_id: Option<String>) -> Self {
        self.account_id = account_id;
        self
    }
}

impl std::fmt::Debug for RequestAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestAuth")
            .field("scheme", &self.scheme)
            .field("token", &"<redacted>")
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Shared HTTP client for the streaming provider endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
}

impl ApiClient {
    pub fn new(timeout: Option<Duration>) -> Result<Self, ApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ApiError::from)?;
        Ok(Self { http })
    }

    /// POSTs `body` as JSON and returns the response's SSE frames.
    ///
    /// Non-success statuses are read in full and mapped through
    /// [`status_error`]; 401 becomes [`ApiError::Unauthorized`].
    pub async fn post_event_stream<B>(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &B,
        cancel: &CancelSignal,
    ) -> Result<FrameStream, ApiError>
    where
        B: Serialize + ?Sized,
    {
        if is_cancelled(cancel) {
            return Err(ApiError::Cancelled);
        }

        tracing::debug!(url, "sending streaming request");
        let response = self.http.post(url).headers(headers).json(body).send();
        let response = await_or_cancel(response, cancel).await??;

        let status = response.status();
        if !status.is_success() {
            let body = await_or_cancel(response.text(), cancel)
                .await?
                .unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "provider rejected request");
            return Err(status_error(status, &body));
        }

        Ok(event_frames(response, cancel.clone()))
    }
}

struct FrameState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    parser: SseFrameParser,
    pending: VecDeque<SseFrame>,
    cancel: CancelSignal,
    finished: bool,
}

/// Turns a successful streaming response into a lazy sequence of SSE frames.
///
/// Each read is raced against `cancel`; once cancellation is observed the
/// stream yields [`ApiError::Cancelled`] and ends.
pub fn event_frames(response: Response, cancel: CancelSignal) -> FrameStream {
    let state = FrameState {
        bytes: response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed(),
        parser: SseFrameParser::default(),
        pending: VecDeque::new(),
        cancel,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.finished {
                return None;
            }

            let next = match await_or_cancel(state.bytes.next(), &state.cancel).await {
                Ok(next) => next,
                Err(cancelled) => {
                    state.finished = true;
                    return Some((Err(ApiError::from(cancelled)), state));
                }
            };

            match next {
                Some(Ok(chunk)) => state.pending.extend(state.parser.feed(&chunk)),
                Some(Err(error)) => {
                    state.finished = true;
                    return Some((Err(ApiError::from(error)), state));
                }
                None => {
                    state.finished = true;
                    state.pending.extend(state.parser.finish());
                }
            }
        }
    })
    .boxed()
}

/// Header table shared by every streaming request, keyed in lower case.
/// Provider-specific entries are added on top.
pub(crate) fn streaming_headers(user_agent: Option<&str>) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("accept".to_owned(), "text/event-stream".to_owned()),
        ("content-type".to_owned(), "application/json".to_owned()),
        ("user-agent".to_owned(), resolve_user_agent(user_agent)),
    ])
}

/// Configured extra headers override built-in ones of the same name.
pub(crate) fn merge_extra_headers(headers: &mut BTreeMap<String, String>, extra: &BTreeMap<String, String>) {
    for (key, value) in extra {
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }
}

/// Trimmed token of `auth`; a blank token means no credential was supplied.
pub(crate) fn required_token(auth: &RequestAuth) -> Result<&str, ApiError> {
    match auth.token.trim() {
        "" => Err(ApiError::MissingCredential),
        token => Ok(token),
    }
}

/// Converts an ordered header table into a reqwest header map.
pub fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, ApiError> {
    let mut out = HeaderMap::new();
    for (key, value) in headers {
        out.insert(
            HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| ApiError::InvalidHeader(format!("invalid header key: {key}")))?,
            HeaderValue::from_str(value)
                .map_err(|_| ApiError::InvalidHeader(format!("invalid header value for {key}")))?,
        );
    }
    Ok(out)
}
