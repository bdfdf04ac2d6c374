use std::sync::Arc;

use agent_provider::{await_or_cancel, CancelSignal, ProviderError};
use credentials::{AuthHeader, CredentialError, CredentialKind, CredentialManager};
use provider_api::RequestAuth;

use crate::ProviderKind;

/// Credential lookups for one configured provider.
#[derive(Debug, Clone)]
pub struct CredentialSource {
    manager: Arc<CredentialManager>,
    provider_id: String,
    kind: ProviderKind,
}

impl CredentialSource {
    #[must_use]
    pub fn new(manager: Arc<CredentialManager>, provider_id: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            manager,
            provider_id: provider_id.into(),
            kind,
        }
    }

    #[must_use]
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub async fn auth_header(&self, cancel: &CancelSignal) -> Result<AuthHeader, ProviderError> {
        await_or_cancel(self.manager.auth_header(&self.provider_id), cancel)
            .await?
            .map_err(credential_error)
    }

    pub async fn refresh_rejected(&self, rejected: &AuthHeader, cancel: &CancelSignal) -> Result<AuthHeader, ProviderError> {
        await_or_cancel(self.manager.refresh_rejected(&self.provider_id, rejected), cancel)
            .await?
            .map_err(credential_error)
    }

    /// How `header` is presented on the wire for this provider's protocol.
    #[must_use]
    pub fn request_auth(&self, header: &AuthHeader) -> RequestAuth {
        match (self.kind, header.kind) {
            (ProviderKind::Anthropic, CredentialKind::ApiKey) => RequestAuth::api_key(&header.token),
            (ProviderKind::Codex, _) => RequestAuth::bearer(&header.token).with_account_id(header.account_id.clone()),
            _ => RequestAuth::bearer(&header.token),
        }
    }
}

fn credential_error(error: CredentialError) -> ProviderError {
    if error.requires_login() {
        ProviderError::auth(format!("{error}; run /login or configure an API key"))
    } else {
        match error {
            CredentialError::Http(source) => ProviderError::transport(source.to_string()),
            other => ProviderError::auth(other.to_string()),
        }
    }
}
