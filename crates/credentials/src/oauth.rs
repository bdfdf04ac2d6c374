//! Authorization-code-with-PKCE flow and token endpoint client.

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use rand::{thread_rng, RngCore};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::callback::{CallbackServer, DEFAULT_CALLBACK_PORT};
use crate::credential::{unix_now, Credential, CredentialKind};
use crate::error::CredentialError;
use crate::jwt::decode_claims;
use crate::manager::{AuthorizationFlow, TokenRefresher, UrlPresenter};

pub const DEFAULT_ISSUER: &str = "https://auth.openai.com";
pub const DEFAULT_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";
pub const DEFAULT_ORIGINATOR: &str = "codex_cli_rs";
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(180);

const SCOPES: &str = "openid profile email offline_access";
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceCodes {
    pub verifier: String,
    pub challenge: String,
}

impl PkceCodes {
    /// 64 random bytes, base64url without padding, with an S256 challenge.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 64];
        thread_rng().fill_bytes(&mut bytes);
        Self::from_verifier(URL_SAFE_NO_PAD.encode(bytes))
    }

    #[must_use]
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

#[must_use]
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthSettings {
    pub issuer: String,
    pub client_id: String,
    pub originator: String,
    pub callback_port: u16,
    pub login_timeout: Duration,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            originator: DEFAULT_ORIGINATOR.to_string(),
            callback_port: DEFAULT_CALLBACK_PORT,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
        }
    }
}

impl OAuthSettings {
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_callback_port(mut self, port: u16) -> Self {
        self.callback_port = port;
        self
    }

    #[must_use]
    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.issuer.trim_end_matches('/'))
    }
}

pub fn authorization_url(
    settings: &OAuthSettings,
    redirect_uri: &str,
    pkce: &PkceCodes,
    state: &str,
) -> Result<String, CredentialError> {
    let raw = settings.endpoint("oauth/authorize");
    let mut url = Url::parse(&raw).map_err(|error| CredentialError::InvalidUrl {
        url: raw.clone(),
        reason: error.to_string(),
    })?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &settings.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", SCOPES)
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("id_token_add_organizations", "true")
        .append_pair("codex_cli_simplified_flow", "true")
        .append_pair("state", state)
        .append_pair("originator", &settings.originator);
    Ok(url.into())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Token endpoint client for one OAuth-backed provider.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    provider: String,
    settings: OAuthSettings,
}

impl OAuthClient {
    pub fn new(provider: impl Into<String>, settings: OAuthSettings) -> Result<Self, CredentialError> {
        let http = reqwest::Client::builder()
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            provider: provider.into(),
            settings,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        pkce: &PkceCodes,
    ) -> Result<Credential, CredentialError> {
        let tokens = self
            .post_token_form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.settings.client_id.as_str()),
                ("code_verifier", pkce.verifier.as_str()),
            ])
            .await?;
        let refresh_token = tokens.refresh_token.clone().ok_or_else(|| {
            CredentialError::TokenResponse("authorization response carried no refresh_token".to_string())
        })?;
        Ok(self.credential_from_tokens(tokens, refresh_token, None))
    }

    pub async fn refresh_credential(&self, current: &Credential) -> Result<Credential, CredentialError> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| CredentialError::NotRefreshable {
                provider: current.provider.clone(),
                reason: "no refresh token stored".to_string(),
            })?;

        let tokens = self
            .post_token_form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.settings.client_id.as_str()),
            ])
            .await?;
        // Servers that do not rotate refresh tokens omit the field.
        let next_refresh = tokens
            .refresh_token
            .clone()
            .unwrap_or_else(|| refresh_token.to_string());
        Ok(self.credential_from_tokens(tokens, next_refresh, Some(current)))
    }

    async fn post_token_form(&self, form: &[(&str, &str)]) -> Result<TokenResponse, CredentialError> {
        let response = self
            .http
            .post(self.settings.endpoint("oauth/token"))
            .form(form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CredentialError::TokenEndpoint {
                status: status.as_u16(),
                message: token_error_message(&body),
            });
        }
        serde_json::from_str(&body).map_err(|error| CredentialError::TokenResponse(error.to_string()))
    }

    fn credential_from_tokens(
        &self,
        tokens: TokenResponse,
        refresh_token: String,
        previous: Option<&Credential>,
    ) -> Credential {
        let id_token = tokens
            .id_token
            .or_else(|| previous.and_then(|credential| credential.id_token.clone()));
        let id_claims = id_token.as_deref().and_then(decode_claims).unwrap_or_default();
        let access_claims = decode_claims(&tokens.access_token).unwrap_or_default();

        let expires_at = tokens
            .expires_in
            .map(|seconds| unix_now().saturating_add(seconds))
            .or(access_claims.expires_at);

        Credential {
            provider: self.provider.clone(),
            kind: CredentialKind::OAuth,
            access_token: tokens.access_token,
            refresh_token: Some(refresh_token),
            id_token,
            expires_at,
            account_id: id_claims
                .account_id
                .or(access_claims.account_id)
                .or_else(|| previous.and_then(|credential| credential.account_id.clone())),
            project_id: id_claims
                .project_id
                .or_else(|| previous.and_then(|credential| credential.project_id.clone())),
        }
    }
}

fn token_error_message(body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(parsed) = serde_json::from_str::<TokenErrorBody>(trimmed) {
        if let Some(description) = parsed.error_description.filter(|text| !text.trim().is_empty()) {
            return description;
        }
        match parsed.error {
            Some(serde_json::Value::String(code)) => return code,
            Some(serde_json::Value::Object(object)) => {
                if let Some(message) = object.get("message").and_then(serde_json::Value::as_str) {
                    return message.to_string();
                }
            }
            _ => {}
        }
    }
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.to_string()
    }
}

impl TokenRefresher for OAuthClient {
    fn refresh(&self, credential: Credential) -> BoxFuture<'static, Result<Credential, CredentialError>> {
        let client = self.clone();
        async move { client.refresh_credential(&credential).await }.boxed()
    }
}

impl AuthorizationFlow for OAuthClient {
    fn authorize(&self, present_url: UrlPresenter) -> BoxFuture<'static, Result<Credential, CredentialError>> {
        let client = self.clone();
        async move {
            let pkce = PkceCodes::generate();
            let state = generate_state();
            let server = CallbackServer::bind(client.settings.callback_port).await?;
            let redirect_uri = server.redirect_uri();
            let url = authorization_url(&client.settings, &redirect_uri, &pkce, &state)?;

            tracing::info!(provider = %client.provider, port = server.port(), "waiting for authorization callback");
            present_url(&url);

            let code = server.wait_for_code(&state, client.settings.login_timeout).await?;
            let credential = client.exchange_code(&code, &redirect_uri, &pkce).await?;
            tracing::info!(provider = %client.provider, "authorization completed");
            Ok(credential)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{
        authorization_url, token_error_message, OAuthClient, OAuthSettings, PkceCodes, TokenResponse,
    };
    use crate::credential::Credential;
    use crate::jwt::encode_for_tests;

    #[test]
    fn challenge_is_s256_of_verifier() {
        // RFC 7636 appendix B.
        let pkce = PkceCodes::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(pkce.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");

        let generated = PkceCodes::generate();
        assert_eq!(generated.verifier.len(), 86);
        assert!(!generated.verifier.contains('='));
    }

    #[test]
    fn authorization_url_carries_challenge_state_and_identifiers() {
        let pkce = PkceCodes::from_verifier("verifier");
        let url = authorization_url(
            &OAuthSettings::default(),
            "http://localhost:1455/auth/callback",
            &pkce,
            "state-1",
        )
        .expect("url");
        let parsed = url::Url::parse(&url).expect("parse");
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(parsed.path(), "/oauth/authorize");
        assert_eq!(pairs["code_challenge"], pkce.challenge);
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["state"], "state-1");
        assert_eq!(pairs["client_id"], "app_EMoamEEZ73f0CkXaXp7hrann");
        assert_eq!(pairs["redirect_uri"], "http://localhost:1455/auth/callback");
        assert_eq!(pairs["scope"], "openid profile email offline_access");
    }

    #[test]
    fn refreshed_credential_keeps_previous_identifiers_when_id_token_missing() {
        let client = OAuthClient::new("codex", OAuthSettings::default()).expect("client");
        let mut previous = Credential::oauth("codex", "old", "refresh-1", Some(1));
        previous.account_id = Some("acct-1".to_string());

        let refreshed = client.credential_from_tokens(
            TokenResponse {
                access_token: encode_for_tests(&json!({"exp": 2_000_000_000})),
                refresh_token: None,
                id_token: None,
                expires_in: None,
            },
            "refresh-1".to_string(),
            Some(&previous),
        );

        assert_eq!(refreshed.expires_at, Some(2_000_000_000));
        assert_eq!(refreshed.account_id.as_deref(), Some("acct-1"));
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[test]
    fn token_errors_prefer_description() {
        assert_eq!(
            token_error_message(r#"{"error":"invalid_grant","error_description":"refresh token expired"}"#),
            "refresh token expired"
        );
        assert_eq!(token_error_message(r#"{"error":"invalid_grant"}"#), "invalid_grant");
        assert_eq!(token_error_message("  "), "empty response body");
    }
}
