use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credential stored for provider '{provider}'")]
    NotFound { provider: String },

    #[error("credential for provider '{provider}' cannot be refreshed: {reason}")]
    NotRefreshable { provider: String, reason: String },

    #[error("no authorization flow registered for provider '{provider}'")]
    NoAuthorizationFlow { provider: String },

    #[error("credential store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credential store at {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid authorization server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("token endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token endpoint returned HTTP {status}: {message}")]
    TokenEndpoint { status: u16, message: String },

    #[error("token response is malformed: {0}")]
    TokenResponse(String),

    #[error("authorization callback failed: {0}")]
    Callback(String),

    #[error("authorization callback state mismatch")]
    StateMismatch,

    #[error("authorization denied: {0}")]
    Denied(String),

    #[error("timed out waiting for the authorization callback")]
    CallbackTimeout,

    #[error("credential refresh task failed: {0}")]
    RefreshTask(String),
}

impl CredentialError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when re-authorizing is the only way forward.
    #[must_use]
    pub fn requires_login(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::NotRefreshable { .. } => true,
            Self::TokenEndpoint { status, .. } => matches!(status, 400 | 401 | 403),
            _ => false,
        }
    }
}
