use std::time::{Duration, SystemTime, UNIX_EPOCH};

use agent_provider::ProviderError;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::transient::is_transient_failure;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("credential is missing or empty")]
    MissingCredential,
    #[error("account id is required")]
    MissingAccountId,
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("invalid request payload: {0}")]
    InvalidRequestPayload(String),
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("authentication rejected (HTTP {status}): {message}")]
    Unauthorized { status: StatusCode, message: String },
    #[error("HTTP {status} {message}")]
    Status { status: StatusCode, message: String },
    #[error("malformed SSE event: {0}")]
    MalformedEvent(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{}", stream_failure_text(.code.as_deref(), .message))]
    StreamFailed {
        code: Option<String>,
        message: String,
    },
    #[error("stream ended before the response completed")]
    Truncated,
    #[error("request was cancelled")]
    Cancelled,
}

impl ApiError {
    /// Whether retrying the same request later is likely to succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(error) => error.is_connect() || error.is_timeout(),
            Self::Status { status, message } => is_transient_failure(status.as_u16(), message),
            Self::StreamFailed { message, .. } => is_transient_failure(0, message),
            Self::Truncated => true,
            _ => false,
        }
    }
}

impl From<agent_provider::Cancelled> for ApiError {
    fn from(_: agent_provider::Cancelled) -> Self {
        Self::Cancelled
    }
}

impl From<ApiError> for ProviderError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Cancelled => ProviderError::Cancelled,
            ApiError::MissingCredential | ApiError::MissingAccountId => {
                ProviderError::auth(error.to_string())
            }
            ApiError::Unauthorized { message, .. } => ProviderError::Auth { message },
            ApiError::Status { status, message } => ProviderError::Status {
                status: status.as_u16(),
                message,
            },
            ApiError::StreamFailed { .. } => ProviderError::Stream {
                message: error.to_string(),
            },
            ApiError::MalformedEvent(_) | ApiError::Serde(_) | ApiError::Truncated => {
                ProviderError::decode(error.to_string())
            }
            ApiError::Request(_) | ApiError::InvalidHeader(_) | ApiError::InvalidRequestPayload(_) => {
                ProviderError::transport(error.to_string())
            }
        }
    }
}

fn stream_failure_text(code: Option<&str>, message: &str) -> String {
    match code {
        Some(code) if !code.trim().is_empty() => format!("stream failed ({code}): {message}"),
        _ => format!("stream failed: {message}"),
    }
}

/// `{"error": {...}}` envelope shared by all three provider protocols.
#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    pub(crate) message: Option<String>,
    pub(crate) code: Option<String>,
    #[serde(rename = "type")]
    pub(crate) kind: Option<String>,
    plan_type: Option<String>,
    /// Unix seconds at which a usage limit lifts.
    resets_at: Option<u64>,
}

impl ErrorBody {
    /// The message, else the error type, else the code.
    pub(crate) fn message_or_fallback(&self) -> Option<String> {
        [&self.message, &self.kind, &self.code]
            .into_iter()
            .flatten()
            .find(|text| !text.trim().is_empty())
            .cloned()
    }

    fn is_usage_limit(&self, status: StatusCode) -> bool {
        const LIMIT_CODES: [&str; 3] = ["usage_limit_reached", "usage_not_included", "rate_limit_exceeded"];
        let code = self
            .code
            .as_deref()
            .filter(|code| !code.is_empty())
            .or(self.kind.as_deref())
            .unwrap_or_default();
        status == StatusCode::TOO_MANY_REQUESTS || LIMIT_CODES.iter().any(|known| code.eq_ignore_ascii_case(known))
    }

    fn usage_limit_text(&self, now: SystemTime) -> String {
        let mut text = String::from("You have hit your usage limit");
        if let Some(plan) = self.plan_type.as_deref().filter(|plan| !plan.is_empty()) {
            text.push_str(&format!(" ({} plan)", plan.to_ascii_lowercase()));
        }
        text.push('.');
        if let Some(resets_at) = self.resets_at.filter(|seconds| *seconds > 0) {
            let remaining = (UNIX_EPOCH + Duration::from_secs(resets_at))
                .duration_since(now)
                .unwrap_or_default();
            let minutes = (remaining.as_secs_f64() / 60.0).round();
            text.push_str(&format!(" Try again in ~{minutes} min."));
        }
        text
    }
}

/// Human-readable message for an error response body. Usage-limit failures
/// become a hint about when the limit resets.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).unwrap_or_default();
    if envelope.error.is_usage_limit(status) {
        return envelope.error.usage_limit_text(SystemTime::now());
    }
    if let Some(message) = envelope.error.message.filter(|message| !message.is_empty()) {
        return message;
    }
    if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body.to_string()
    }
}

/// Maps a non-success response to the matching error variant.
pub fn status_error(status: StatusCode, body: &str) -> ApiError {
    let message = parse_error_message(status, body);
    if status == StatusCode::UNAUTHORIZED {
        ApiError::Unauthorized { status, message }
    } else {
        ApiError::Status { status, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_hint_counts_whole_minutes() {
        let body = ErrorBody {
            plan_type: Some("PLUS".to_string()),
            resets_at: Some(1_000 + 30 * 60),
            ..ErrorBody::default()
        };
        let now = UNIX_EPOCH + Duration::from_secs(1_000);
        assert_eq!(
            body.usage_limit_text(now),
            "You have hit your usage limit (plus plan). Try again in ~30 min."
        );
    }

    #[test]
    fn only_401_asks_for_reauthentication() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, r#"{"error":{"message":"token expired"}}"#),
            ApiError::Unauthorized { message, .. } if message == "token expired"
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, r#"{"error":{"message":"model not allowed"}}"#),
            ApiError::Status { status: StatusCode::FORBIDDEN, message } if message == "model not allowed"
        ));
    }

    #[test]
    fn fallback_message_prefers_text_over_type_over_code() {
        let body: ErrorBody = serde_json::from_str(r#"{"type":"overloaded_error","code":"529"}"#).expect("body");
        assert_eq!(body.message_or_fallback().as_deref(), Some("overloaded_error"));
        let body: ErrorBody = serde_json::from_str(r#"{"message":"","code":"1302"}"#).expect("body");
        assert_eq!(body.message_or_fallback().as_deref(), Some("1302"));
        assert_eq!(ErrorBody::default().message_or_fallback(), None);
    }
}
