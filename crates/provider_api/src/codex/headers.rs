use std::collections::BTreeMap;

use super::config::CodexConfig;
use crate::client::{merge_extra_headers, required_token, streaming_headers, RequestAuth};
use crate::error::ApiError;

/// Header table for one Codex Responses request.
///
/// The ChatGPT backend routes by account, so `auth` must carry the account id
/// (the credential store derives it from the access token at login).
pub fn build_headers(config: &CodexConfig, auth: &RequestAuth) -> Result<BTreeMap<String, String>, ApiError> {
    let token = required_token(auth)?;
    let account_id = non_blank(auth.account_id.as_deref()).ok_or(ApiError::MissingAccountId)?;

    let mut headers = streaming_headers(config.user_agent.as_deref());
    headers.extend([
        ("authorization".to_owned(), format!("Bearer {token}")),
        ("chatgpt-account-id".to_owned(), account_id.to_owned()),
        ("openai-beta".to_owned(), "responses=experimental".to_owned()),
        ("originator".to_owned(), config.originator.trim().to_owned()),
    ]);
    merge_extra_headers(&mut headers, &config.extra_headers);
    if let Some(session_id) = non_blank(config.session_id.as_deref()) {
        headers.insert("session_id".to_owned(), session_id.to_owned());
    }
    Ok(headers)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn account_id_is_required() {
        let error = build_headers(&CodexConfig::default(), &RequestAuth::bearer("tok")).expect_err("no account");
        assert_matches!(error, ApiError::MissingAccountId);
    }

    #[test]
    fn session_id_is_sent_when_configured() {
        let config = CodexConfig::default()
            .with_session_id(" s-1 ")
            .insert_header("X-Trace", "on");
        let auth = RequestAuth::bearer("tok").with_account_id(Some("acct".to_string()));
        let headers = build_headers(&config, &auth).expect("headers");
        assert_eq!(headers.get("session_id").map(String::as_str), Some("s-1"));
        assert_eq!(headers.get("x-trace").map(String::as_str), Some("on"));
        assert_eq!(headers.get("originator").map(String::as_str), Some("codex_cli_rs"));
    }
}
