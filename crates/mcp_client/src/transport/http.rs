use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use agent_provider::sse::SseFrameParser;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;

use super::{forward_payload, InboundSender, Transport, TransportEvent};
use crate::error::McpError;
use crate::lock_unpoisoned;

const SESSION_HEADER: &str = "mcp-session-id";

/// Streamable HTTP: every message is a POST; the reply comes back as a JSON
/// body or as an SSE stream on that same response.
pub(crate) struct HttpTransport {
    server_id: String,
    url: String,
    http: Client,
    headers: HeaderMap,
    session_id: Mutex<Option<String>>,
    inbound: InboundSender,
    closed: AtomicBool,
}

impl HttpTransport {
    pub(crate) fn new(server_id: &str, url: &str, headers: HeaderMap, inbound: InboundSender) -> Result<Self, McpError> {
        Ok(Self {
            server_id: server_id.to_string(),
            url: url.to_string(),
            http: Client::builder().build()?,
            headers,
            session_id: Mutex::new(None),
            inbound,
            closed: AtomicBool::new(false),
        })
    }

    fn session_id(&self) -> Option<String> {
        lock_unpoisoned(&self.session_id).clone()
    }

    fn closed_by_server(&self, reason: String) -> McpError {
        let _ = self.inbound.send(TransportEvent::Closed(reason.clone()));
        McpError::Closed(reason)
    }

    async fn deliver(&self, response: Response) -> Result<(), McpError> {
        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream"));

        if !is_stream {
            let body = response.text().await?;
            forward_payload(&self.server_id, &body, &self.inbound);
            return Ok(());
        }

        let server = self.server_id.clone();
        let inbound = self.inbound.clone();
        tokio::spawn(async move {
            let mut parser = SseFrameParser::default();
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(chunk) => {
                        for frame in parser.feed(&chunk) {
                            forward_payload(&server, &frame.data, &inbound);
                        }
                    }
                    Err(error) => {
                        tracing::warn!(server = %server, %error, "MCP response stream failed");
                        return;
                    }
                }
            }
            if let Some(frame) = parser.finish() {
                forward_payload(&server, &frame.data, &inbound);
            }
        });
        Ok(())
    }
}

impl Transport for HttpTransport {
    fn send(&self, message: Value) -> BoxFuture<'_, Result<(), McpError>> {
        async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(McpError::Closed("transport closed".to_string()));
            }

            let sent_session = self.session_id();
            let mut request = self
                .http
                .post(&self.url)
                .headers(self.headers.clone())
                .header(ACCEPT, "application/json, text/event-stream")
                .json(&message);
            if let Some(session) = &sent_session {
                request = request.header(SESSION_HEADER, session);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(error) if error.is_connect() => {
                    return Err(self.closed_by_server(format!("cannot reach server: {error}")))
                }
                Err(error) => return Err(error.into()),
            };

            if let Some(session) = response.headers().get(SESSION_HEADER).and_then(|value| value.to_str().ok()) {
                let mut current = lock_unpoisoned(&self.session_id);
                if current.as_deref() != Some(session) {
                    tracing::debug!(server = %self.server_id, session, "MCP session established");
                    *current = Some(session.to_string());
                }
            }

            let status = response.status();
            if status == StatusCode::NOT_FOUND && sent_session.is_some() {
                return Err(self.closed_by_server("server ended the MCP session".to_string()));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(McpError::Status {
                    status: status.as_u16(),
                    message: body.trim().to_string(),
                });
            }
            if status == StatusCode::ACCEPTED {
                return Ok(());
            }
            self.deliver(response).await
        }
        .boxed()
    }

    /// Ends the server-side session when one was assigned.
    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            let Some(session) = self.session_id() else {
                return;
            };
            let result = self
                .http
                .delete(&self.url)
                .headers(self.headers.clone())
                .header(SESSION_HEADER, &session)
                .send()
                .await;
            if let Err(error) = result {
                tracing::debug!(server = %self.server_id, %error, "failed to end MCP session");
            }
        }
        .boxed()
    }
}
