//! Provider adapters implementing the shared `agent_provider` contract.
//!
//! Each adapter maps a provider-neutral [`ProviderRequest`] onto one wire
//! protocol from `provider_api`, attaches credentials from the
//! [`CredentialManager`], and decodes the event stream back into
//! [`StreamDelta`](agent_provider::StreamDelta)s. A 401 triggers exactly one
//! credential refresh and retry before the failure surfaces.

mod anthropic;
mod auth;
mod chat;
mod codex;
mod dispatch;
mod stream;

use std::sync::Arc;
use std::time::Duration;

use agent_provider::{CancelSignal, DeltaStream, ModelProvider, ProviderError, ProviderProfile, ProviderRequest};
use credentials::{AuthHeader, CredentialManager};
use provider_api::{ApiClient, ApiError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use anthropic::AnthropicAdapter;
pub use auth::CredentialSource;
pub use chat::ChatCompletionsAdapter;
pub use codex::CodexAdapter;

pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Wire protocol spoken by a configured provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    Codex,
    ChatCompletions,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Codex => "codex",
            Self::ChatCompletions => "chat_completions",
        }
    }

    #[must_use]
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-5-20250929",
            Self::Codex => "gpt-5.1-codex",
            Self::ChatCompletions => "glm-4.6",
        }
    }

    /// Whether credentials come from an interactive OAuth login.
    #[must_use]
    pub fn uses_oauth(self) -> bool {
        matches!(self, Self::Codex)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to construct one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub provider_id: String,
    pub kind: ProviderKind,
    pub model_id: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub reasoning_effort: Option<String>,
    pub request_timeout: Option<Duration>,
    pub session_id: Option<String>,
}

impl ProviderSettings {
    #[must_use]
    pub fn new(provider_id: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            provider_id: provider_id.into(),
            kind,
            model_id: None,
            base_url: None,
            max_tokens: None,
            reasoning_effort: None,
            request_timeout: None,
            session_id: None,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    fn profile(&self) -> ProviderProfile {
        let model = self
            .model_id
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or(self.kind.default_model());
        ProviderProfile {
            provider_id: self.provider_id.clone(),
            default_model_id: model.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("provider id must not be empty")]
    EmptyProviderId,
    #[error("failed to build HTTP client for provider '{provider}': {source}")]
    Client {
        provider: String,
        #[source]
        source: ApiError,
    },
}

/// Closed set of supported provider adapters.
#[derive(Debug, Clone)]
pub enum ProviderAdapter {
    Anthropic(AnthropicAdapter),
    Codex(CodexAdapter),
    ChatCompletions(ChatCompletionsAdapter),
}

impl ProviderAdapter {
    pub fn from_settings(settings: &ProviderSettings, credentials: Arc<CredentialManager>) -> Result<Self, AdapterError> {
        if settings.provider_id.trim().is_empty() {
            return Err(AdapterError::EmptyProviderId);
        }
        let api = ApiClient::new(settings.request_timeout).map_err(|source| AdapterError::Client {
            provider: settings.provider_id.clone(),
            source,
        })?;
        let source = CredentialSource::new(credentials, settings.provider_id.clone(), settings.kind);
        let profile = settings.profile();

        tracing::debug!(
            provider = %settings.provider_id,
            kind = %settings.kind,
            model = %profile.default_model_id,
            "provider adapter configured"
        );

        Ok(match settings.kind {
            ProviderKind::Anthropic => Self::Anthropic(AnthropicAdapter::new(api, settings, profile, source)),
            ProviderKind::Codex => Self::Codex(CodexAdapter::new(api, settings, profile, source)),
            ProviderKind::ChatCompletions => {
                Self::ChatCompletions(ChatCompletionsAdapter::new(api, settings, profile, source))
            }
        })
    }

    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Anthropic(_) => ProviderKind::Anthropic,
            Self::Codex(_) => ProviderKind::Codex,
            Self::ChatCompletions(_) => ProviderKind::ChatCompletions,
        }
    }

    fn credentials(&self) -> &CredentialSource {
        match self {
            Self::Anthropic(adapter) => adapter.credentials(),
            Self::Codex(adapter) => adapter.credentials(),
            Self::ChatCompletions(adapter) => adapter.credentials(),
        }
    }

    /// Header the next request would carry, refreshing it first if needed.
    pub async fn auth_header(&self) -> Result<AuthHeader, ProviderError> {
        self.credentials()
            .auth_header(&agent_provider::new_cancel_signal())
            .await
    }
}

impl ModelProvider for ProviderAdapter {
    fn profile(&self) -> ProviderProfile {
        match self {
            Self::Anthropic(adapter) => adapter.profile(),
            Self::Codex(adapter) => adapter.profile(),
            Self::ChatCompletions(adapter) => adapter.profile(),
        }
    }

    fn send(&self, request: ProviderRequest, cancel: CancelSignal) -> DeltaStream {
        match self {
            Self::Anthropic(adapter) => adapter.send(request, cancel),
            Self::Codex(adapter) => adapter.send(request, cancel),
            Self::ChatCompletions(adapter) => adapter.send(request, cancel),
        }
    }
}

/// Model to use for `request`, falling back to the adapter default.
pub(crate) fn resolve_model(request: &ProviderRequest, profile: &ProviderProfile) -> String {
    let requested = request.model_id.trim();
    if requested.is_empty() {
        profile.default_model_id.clone()
    } else {
        requested.to_string()
    }
}
