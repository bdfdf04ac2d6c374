use std::collections::BTreeMap;

/// ChatGPT backend hosting the Codex Responses endpoint.
pub const DEFAULT_CODEX_BASE_URL: &str = "https://chatgpt.com/backend-api";

/// Transport configuration for Codex Responses requests.
///
/// Credentials are supplied per request; this only carries endpoint and
/// header policy.
#[derive(Debug, Clone)]
pub struct CodexConfig {
    /// Base URL for Codex endpoints.
    pub base_url: String,
    /// Client-origin identifier added to outgoing headers.
    pub originator: String,
    /// Optional `session_id` request header value, also used as prompt cache key.
    pub session_id: Option<String>,
    /// Optional `User-Agent` override.
    pub user_agent: Option<String>,
    /// Requested reasoning effort (`minimal`..`xhigh`).
    pub reasoning_effort: Option<String>,
    /// Additional headers merged into request headers.
    pub extra_headers: BTreeMap<String, String>,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CODEX_BASE_URL.to_string(),
            originator: "codex_cli_rs".to_string(),
            session_id: None,
            user_agent: None,
            reasoning_effort: None,
            extra_headers: BTreeMap::new(),
        }
    }
}

impl CodexConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_originator(mut self, originator: impl Into<String>) -> Self {
        self.originator = originator.into();
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }

    /// Fully normalized `.../codex/responses` endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        normalize_codex_url(&self.base_url)
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }
}

/// Resolves a configured base URL to the Codex responses endpoint.
///
/// A URL already ending in `/codex/responses` is kept; one ending in `/codex`
/// gains `/responses`; anything else gains `/codex/responses`. A blank input
/// falls back to [`DEFAULT_CODEX_BASE_URL`].
pub fn normalize_codex_url(input: &str) -> String {
    let input = input.trim();
    let base = if input.is_empty() {
        DEFAULT_CODEX_BASE_URL
    } else {
        input
    }
    .trim_end_matches('/');

    if base.ends_with("/codex/responses") {
        base.to_string()
    } else if base.ends_with("/codex") {
        format!("{base}/responses")
    } else {
        format!("{base}/codex/responses")
    }
}
