//! One-shot loopback listener for the authorization redirect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tiny_http::{Header, Request, Response, Server, StatusCode};
use url::Url;

use crate::error::CredentialError;

pub const DEFAULT_CALLBACK_PORT: u16 = 1455;
pub const CALLBACK_PATH: &str = "/auth/callback";

/// Upper bound on one `recv` wait, so an abandoned login is noticed.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

const SUCCESS_PAGE: &str = "<!doctype html><html><head><meta charset=\"utf-8\"><title>Signed in</title></head>\
<body><h2>Signed in</h2><p>Authorization is complete. You can close this tab and return to the terminal.</p></body></html>";
const PENDING_PAGE: &str = "<html><body><h2>Waiting for authorization...</h2>\
<p>You can close this tab once the consent flow finishes.</p></body></html>";

#[derive(Debug, PartialEq, Eq)]
enum CallbackOutcome {
    Code(String),
    Denied(String),
    Pending,
}

/// Listener bound to the loopback interface, consumed by
/// [`CallbackServer::wait_for_code`].
///
/// Each connection is read on its own worker thread inside `tiny_http`, so a
/// connection that never sends a request does not hold up the redirect.
pub struct CallbackServer {
    server: Server,
    port: u16,
}

impl std::fmt::Debug for CallbackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackServer").field("port", &self.port).finish_non_exhaustive()
    }
}

impl CallbackServer {
    /// Binds `127.0.0.1:preferred_port`, falling back to an ephemeral port.
    pub async fn bind(preferred_port: u16) -> Result<Self, CredentialError> {
        let server = match Server::http(("127.0.0.1", preferred_port)) {
            Ok(server) => server,
            Err(error) => {
                tracing::debug!(port = preferred_port, %error, "callback port busy, using an ephemeral port");
                Server::http(("127.0.0.1", 0))
                    .map_err(|error| CredentialError::Callback(format!("unable to bind callback listener: {error}")))?
            }
        };
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .ok_or_else(|| CredentialError::Callback("callback listener has no TCP address".to_string()))?;
        Ok(Self { server, port })
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{CALLBACK_PATH}", self.port)
    }

    /// Serves requests until one carries a code for `expected_state`.
    ///
    /// Requests to other paths get a 404; a callback without a code gets a
    /// waiting page. Both keep the listener open. Dropping the returned
    /// future stops the listener at its next poll.
    pub async fn wait_for_code(self, expected_state: &str, timeout: Duration) -> Result<String, CredentialError> {
        let abandoned = Arc::new(AtomicBool::new(false));
        let _abandon_on_drop = AbandonOnDrop(Arc::clone(&abandoned));
        let expected_state = expected_state.to_string();
        let deadline = Instant::now() + timeout;

        tokio::task::spawn_blocking(move || serve(&self.server, &expected_state, deadline, &abandoned))
            .await
            .map_err(|error| CredentialError::Callback(format!("callback listener stopped: {error}")))?
    }
}

struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

fn serve(server: &Server, expected_state: &str, deadline: Instant, abandoned: &AtomicBool) -> Result<String, CredentialError> {
    loop {
        if abandoned.load(Ordering::Acquire) {
            return Err(CredentialError::Callback("login was abandoned".to_string()));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CredentialError::CallbackTimeout);
        }
        let request = match server.recv_timeout(remaining.min(POLL_INTERVAL)) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(error) => return Err(CredentialError::Callback(format!("callback listener failed: {error}"))),
        };

        let target = request.url().to_string();
        let path = target.split('?').next().unwrap_or_default();
        if path != CALLBACK_PATH {
            reply(request, 404, "text/plain", "not found".to_string());
            continue;
        }

        match parse_callback(&target, expected_state) {
            Ok(CallbackOutcome::Code(code)) => {
                reply(request, 200, "text/html; charset=utf-8", SUCCESS_PAGE.to_string());
                return Ok(code);
            }
            Ok(CallbackOutcome::Pending) => {
                reply(request, 200, "text/html; charset=utf-8", PENDING_PAGE.to_string());
            }
            Ok(CallbackOutcome::Denied(message)) => {
                reply(request, 400, "text/html; charset=utf-8", failure_page(&message));
                return Err(CredentialError::Denied(message));
            }
            Err(error) => {
                reply(request, 400, "text/html; charset=utf-8", failure_page(&error.to_string()));
                return Err(error);
            }
        }
    }
}

fn parse_callback(target: &str, expected_state: &str) -> Result<CallbackOutcome, CredentialError> {
    let url = Url::parse(&format!("http://localhost{target}"))
        .map_err(|_| CredentialError::Callback("unable to parse redirect URL".to_string()))?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    let state = state.ok_or_else(|| CredentialError::Callback("redirect is missing the state parameter".to_string()))?;
    if state != expected_state {
        return Err(CredentialError::StateMismatch);
    }

    if let Some(error) = error {
        let description = error_description.unwrap_or_else(|| "Authorization failed.".to_string());
        return Ok(CallbackOutcome::Denied(format!("{description} ({error})")));
    }

    Ok(code
        .filter(|code| !code.is_empty())
        .map_or(CallbackOutcome::Pending, CallbackOutcome::Code))
}

fn reply(request: Request, status: u16, content_type: &str, body: String) {
    let mut response = Response::from_string(body).with_status_code(StatusCode(status));
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes()) {
        response = response.with_header(header);
    }
    if let Err(error) = request.respond(response) {
        tracing::debug!(%error, "failed to write callback response");
    }
}

fn failure_page(message: &str) -> String {
    let escaped = message
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!("<html><body><h2>Login failed</h2><p>{escaped}</p></body></html>")
}
