//! Unverified JWT claim extraction.
//!
//! Tokens are issued to us over TLS by the authorization server; claims are
//! read for bookkeeping only and never trusted for authorization decisions.

use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenClaims {
    pub expires_at: Option<i64>,
    pub account_id: Option<String>,
    pub project_id: Option<String>,
    pub organization_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    exp: Option<i64>,
    #[serde(rename = "https://api.openai.com/auth", default)]
    openai_auth: Option<RawOpenAiAuth>,
}

#[derive(Debug, Deserialize)]
struct RawOpenAiAuth {
    #[serde(default)]
    chatgpt_account_id: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    organizations: Vec<RawOrganization>,
}

#[derive(Debug, Deserialize)]
struct RawOrganization {
    #[serde(default)]
    id: Option<String>,
}

/// Decodes the payload segment of `token`; `None` when it is not a JWT.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let decoded = general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let raw: RawClaims = serde_json::from_slice(&decoded).ok()?;
    let auth = raw.openai_auth;

    Some(TokenClaims {
        expires_at: raw.exp,
        account_id: auth
            .as_ref()
            .and_then(|auth| non_empty(auth.chatgpt_account_id.as_deref())),
        project_id: auth
            .as_ref()
            .and_then(|auth| non_empty(auth.project_id.as_deref())),
        organization_id: auth.as_ref().and_then(|auth| {
            auth.organizations
                .iter()
                .find_map(|org| non_empty(org.id.as_deref()))
        }),
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
pub(crate) fn encode_for_tests(claims: &serde_json::Value) -> String {
    let payload = general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("eyJhbGciOiJub25lIn0.{payload}.sig")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{decode_claims, encode_for_tests, TokenClaims};

    const OPENAI_AUTH_CLAIM: &str = "https://api.openai.com/auth";

    #[test]
    fn reads_expiry_and_openai_identifiers() {
        let token = encode_for_tests(&json!({
            "exp": 1_900_000_000,
            OPENAI_AUTH_CLAIM: {
                "chatgpt_account_id": "acct-1",
                "project_id": "proj-9",
                "organizations": [{"id": "org-a"}, {"id": "org-b"}],
            }
        }));

        assert_eq!(
            decode_claims(&token),
            Some(TokenClaims {
                expires_at: Some(1_900_000_000),
                account_id: Some("acct-1".to_string()),
                project_id: Some("proj-9".to_string()),
                organization_id: Some("org-a".to_string()),
            })
        );
    }

    #[test]
    fn opaque_tokens_have_no_claims() {
        assert_eq!(decode_claims("sk-plain-api-key"), None);
        assert_eq!(decode_claims("a.b.c.d"), None);
    }
}
