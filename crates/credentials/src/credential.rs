use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    ApiKey,
    OAuth,
}

/// Stored secret material for one provider.
///
/// `Debug` never prints token values.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub provider: String,
    pub kind: CredentialKind,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Expiry as unix seconds; `None` for credentials that do not expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl Credential {
    #[must_use]
    pub fn api_key(provider: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: CredentialKind::ApiKey,
            access_token: key.into(),
            refresh_token: None,
            id_token: None,
            expires_at: None,
            account_id: None,
            project_id: None,
        }
    }

    #[must_use]
    pub fn oauth(
        provider: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: Option<i64>,
    ) -> Self {
        Self {
            provider: provider.into(),
            kind: CredentialKind::OAuth,
            access_token: access_token.into(),
            refresh_token: Some(refresh_token.into()),
            id_token: None,
            expires_at,
            account_id: None,
            project_id: None,
        }
    }

    /// True when fewer than `margin` remain before expiry at `now` (unix
    /// seconds). Credentials without an expiry never expire.
    #[must_use]
    pub fn expires_within(&self, now: i64, margin: Duration) -> bool {
        let margin = i64::try_from(margin.as_secs()).unwrap_or(i64::MAX);
        self.expires_at
            .is_some_and(|expires_at| expires_at.saturating_sub(now) <= margin)
    }

    #[must_use]
    pub fn can_refresh(&self) -> bool {
        self.kind == CredentialKind::OAuth
            && self
                .refresh_token
                .as_deref()
                .is_some_and(|token| !token.trim().is_empty())
    }

    #[must_use]
    pub fn auth_header(&self) -> AuthHeader {
        AuthHeader {
            kind: self.kind,
            token: self.access_token.clone(),
            account_id: self.account_id.clone(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("kind", &self.kind)
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("account_id", &self.account_id)
            .field("project_id", &self.project_id)
            .finish()
    }
}

/// Token ready to attach to a request.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthHeader {
    pub kind: CredentialKind,
    pub token: String,
    pub account_id: Option<String>,
}

impl AuthHeader {
    /// `Authorization` header value for bearer-style providers.
    #[must_use]
    pub fn bearer_value(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for AuthHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthHeader")
            .field("kind", &self.kind)
            .field("token", &"<redacted>")
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Current time as unix seconds.
pub(crate) fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
