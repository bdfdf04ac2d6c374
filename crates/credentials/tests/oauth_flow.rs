use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use credentials::callback::CallbackServer;
use credentials::{
    Credential, CredentialError, CredentialKind, CredentialManager, CredentialStore, MemoryCredentialStore,
    OAuthClient, OAuthSettings, UrlPresenter,
};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Loopback token endpoint answering every POST with one scripted body.
struct TokenServer {
    base_url: String,
    bodies: Arc<Mutex<Vec<String>>>,
    task: tokio::task::JoinHandle<()>,
}

impl TokenServer {
    async fn start(status: u16, response: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let base_url = format!("http://{}", listener.local_addr().expect("addr"));
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&bodies);
        let task = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let body = read_form_body(&mut stream).await;
                captured.lock().expect("lock").push(body);
                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{response}",
                    response.len()
                );
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        Self {
            base_url,
            bodies,
            task,
        }
    }

    fn forms(&self) -> Vec<HashMap<String, String>> {
        self.bodies
            .lock()
            .expect("lock")
            .iter()
            .map(|body| {
                url::form_urlencoded::parse(body.as_bytes())
                    .into_owned()
                    .collect()
            })
            .collect()
    }
}

impl Drop for TokenServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_form_body(stream: &mut TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 2048];
    loop {
        let read = stream.read(&mut chunk).await.expect("read");
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        let text = String::from_utf8_lossy(&buffer).to_string();
        if let Some(split) = text.find("\r\n\r\n") {
            let length = text[..split]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buffer.len() >= split + 4 + length {
                return text[split + 4..split + 4 + length].to_string();
            }
        }
    }
    String::new()
}

async fn http_get(port: u16, target: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
    stream
        .write_all(format!("GET {target} HTTP/1.1\r\nHost: localhost:{port}\r\nConnection: close\r\n\r\n").as_bytes())
        .await
        .expect("write");
    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read");
    response
}

fn jwt(claims: serde_json::Value) -> String {
    format!("eyJhbGciOiJub25lIn0.{}.sig", URL_SAFE_NO_PAD.encode(claims.to_string()))
}

#[tokio::test]
async fn refresh_posts_form_and_rotates_tokens() {
    let server = TokenServer::start(
        200,
        serde_json::json!({
            "access_token": "access-2",
            "refresh_token": "refresh-2",
            "expires_in": 3600,
        })
        .to_string(),
    )
    .await;
    let client = OAuthClient::new("codex", OAuthSettings::default().with_issuer(&server.base_url)).expect("client");

    let mut current = Credential::oauth("codex", "access-1", "refresh-1", Some(0));
    current.account_id = Some("acct-1".to_string());
    let refreshed = client.refresh_credential(&current).await.expect("refresh");

    assert_eq!(refreshed.access_token, "access-2");
    assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-2"));
    assert_eq!(refreshed.account_id.as_deref(), Some("acct-1"));
    assert!(refreshed.expires_at.expect("expiry") > 0);

    let forms = server.forms();
    assert_eq!(forms.len(), 1);
    assert_eq!(forms[0]["grant_type"], "refresh_token");
    assert_eq!(forms[0]["refresh_token"], "refresh-1");
    assert_eq!(forms[0]["client_id"], "app_EMoamEEZ73f0CkXaXp7hrann");
}

#[tokio::test]
async fn rejected_refresh_token_requires_login() {
    let server = TokenServer::start(
        400,
        r#"{"error":"invalid_grant","error_description":"refresh token revoked"}"#.to_string(),
    )
    .await;
    let client = OAuthClient::new("codex", OAuthSettings::default().with_issuer(&server.base_url)).expect("client");

    let error = client
        .refresh_credential(&Credential::oauth("codex", "a", "r", Some(0)))
        .await
        .expect_err("rejected");
    assert!(error.requires_login());
    assert_matches!(error, CredentialError::TokenEndpoint { status: 400, message } if message == "refresh token revoked");
}

#[tokio::test]
async fn authorization_flow_exchanges_code_and_persists_credential() {
    let id_token = jwt(serde_json::json!({
        "exp": 4_000_000_000_i64,
        "https://api.openai.com/auth": {
            "chatgpt_account_id": "acct-42",
            "project_id": "proj-7",
        }
    }));
    let server = TokenServer::start(
        200,
        serde_json::json!({
            "access_token": jwt(serde_json::json!({"exp": 4_000_000_000_i64})),
            "refresh_token": "refresh-new",
            "id_token": id_token,
        })
        .to_string(),
    )
    .await;

    let client = OAuthClient::new(
        "codex",
        OAuthSettings::default()
            .with_issuer(&server.base_url)
            .with_callback_port(0)
            .with_login_timeout(Duration::from_secs(10)),
    )
    .expect("client");
    let store = Arc::new(MemoryCredentialStore::default());
    let manager = Arc::new(CredentialManager::new(store.clone()).with_authorization_flow("codex", Arc::new(client)));

    let (url_tx, mut url_rx) = mpsc::unbounded_channel::<String>();
    let presenter: UrlPresenter = Arc::new(move |url: &str| {
        let _ = url_tx.send(url.to_string());
    });

    let flow = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.run_authorization_flow("codex", presenter).await }
    });

    let authorize_url = url::Url::parse(&url_rx.recv().await.expect("url presented")).expect("url");
    let query: HashMap<String, String> = authorize_url.query_pairs().into_owned().collect();
    let redirect = url::Url::parse(&query["redirect_uri"]).expect("redirect");
    let port = redirect.port().expect("port");
    assert_eq!(redirect.path(), "/auth/callback");

    let not_found = http_get(port, "/favicon.ico").await;
    assert!(not_found.starts_with("HTTP/1.1 404"));

    let pending = http_get(port, &format!("/auth/callback?state={}", query["state"])).await;
    assert!(pending.contains("Waiting for authorization"));

    let done = http_get(port, &format!("/auth/callback?code=code-1&state={}", query["state"])).await;
    assert!(done.starts_with("HTTP/1.1 200"));

    let credential = flow.await.expect("join").expect("flow");
    assert_eq!(credential.kind, CredentialKind::OAuth);
    assert_eq!(credential.refresh_token.as_deref(), Some("refresh-new"));
    assert_eq!(credential.account_id.as_deref(), Some("acct-42"));
    assert_eq!(credential.project_id.as_deref(), Some("proj-7"));
    assert_eq!(credential.expires_at, Some(4_000_000_000));
    assert_eq!(store.load("codex").expect("load"), Some(credential));

    let forms = server.forms();
    assert_eq!(forms[0]["grant_type"], "authorization_code");
    assert_eq!(forms[0]["code"], "code-1");
    assert_eq!(forms[0]["redirect_uri"], query["redirect_uri"]);
    assert!(!forms[0]["code_verifier"].is_empty());
}

#[tokio::test]
async fn callback_rejects_mismatched_state() {
    let server = CallbackServer::bind(0).await.expect("bind");
    let port = server.port();
    let waiter = tokio::spawn(async move { server.wait_for_code("expected", Duration::from_secs(5)).await });

    let response = http_get(port, "/auth/callback?code=abc&state=forged").await;
    assert!(response.starts_with("HTTP/1.1 400"));
    assert_matches!(waiter.await.expect("join"), Err(CredentialError::StateMismatch));
}

#[tokio::test]
async fn idle_connection_does_not_hold_up_the_redirect() {
    let server = CallbackServer::bind(0).await.expect("bind");
    let port = server.port();
    let waiter = tokio::spawn(async move { server.wait_for_code("st", Duration::from_secs(5)).await });

    let _preconnect = TcpStream::connect(("127.0.0.1", port)).await.expect("idle connect");
    let mut half_sent = TcpStream::connect(("127.0.0.1", port)).await.expect("partial connect");
    half_sent.write_all(b"GET /auth/cal").await.expect("write");

    let response = http_get(port, "/auth/callback?code=abc&state=st").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert_eq!(waiter.await.expect("join").expect("code"), "abc");
}

#[tokio::test]
async fn unrelated_paths_and_pending_callbacks_keep_listening() {
    let server = CallbackServer::bind(0).await.expect("bind");
    let port = server.port();
    let waiter = tokio::spawn(async move { server.wait_for_code("st", Duration::from_secs(5)).await });

    assert!(http_get(port, "/favicon.ico").await.starts_with("HTTP/1.1 404"));
    let pending = http_get(port, "/auth/callback?state=st").await;
    assert!(pending.contains("Waiting for authorization"), "{pending}");
    assert!(http_get(port, "/auth/callback?state=st&code=xyz").await.starts_with("HTTP/1.1 200"));
    assert_eq!(waiter.await.expect("join").expect("code"), "xyz");
}

#[tokio::test]
async fn callback_times_out() {
    let server = CallbackServer::bind(0).await.expect("bind");
    assert_matches!(
        server.wait_for_code("s", Duration::from_millis(50)).await,
        Err(CredentialError::CallbackTimeout)
    );
}
