use std::sync::Mutex;
use std::time::Duration;

use agent_provider::sse::SseFrameParser;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

use super::{forward_payload, InboundSender, Transport, TransportEvent};
use crate::error::McpError;
use crate::lock_unpoisoned;

/// Legacy HTTP+SSE: one long-lived GET stream carries every server message;
/// client messages are POSTed to the endpoint announced by the first
/// `endpoint` event.
pub(crate) struct SseTransport {
    server_id: String,
    http: Client,
    headers: HeaderMap,
    endpoint: Url,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    pub(crate) async fn connect(
        server_id: &str,
        url: &str,
        headers: HeaderMap,
        inbound: InboundSender,
        connect_timeout: Duration,
    ) -> Result<Self, McpError> {
        let base = Url::parse(url).map_err(|error| McpError::Config {
            server: server_id.to_string(),
            message: format!("invalid url '{url}': {error}"),
        })?;
        let http = Client::builder().build()?;

        let request = http
            .get(base.clone())
            .headers(headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send();
        let response = tokio::time::timeout(connect_timeout, request)
            .await
            .map_err(|_| McpError::Timeout {
                method: "sse connect".to_string(),
                timeout: connect_timeout,
            })??;
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Status {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default().trim().to_string(),
            });
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let server = server_id.to_string();
        let stream_base = base.clone();
        let reader = tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut parser = SseFrameParser::default();
            let mut body = response.bytes_stream();
            let reason = loop {
                let chunk = match body.next().await {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(error)) => break format!("event stream failed: {error}"),
                    None => break "server closed the event stream".to_string(),
                };
                for frame in parser.feed(&chunk) {
                    match frame.event_name() {
                        "endpoint" => match stream_base.join(frame.data.trim()) {
                            Ok(endpoint) => {
                                if let Some(tx) = endpoint_tx.take() {
                                    let _ = tx.send(endpoint);
                                }
                            }
                            Err(error) => tracing::warn!(server = %server, %error, "invalid MCP endpoint event"),
                        },
                        "message" => forward_payload(&server, &frame.data, &inbound),
                        other => tracing::debug!(server = %server, event = other, "ignoring SSE event"),
                    }
                }
            };
            let _ = inbound.send(TransportEvent::Closed(reason));
        });

        let endpoint = match tokio::time::timeout(connect_timeout, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                return Err(McpError::Closed(
                    "event stream ended before announcing an endpoint".to_string(),
                ))
            }
            Err(_) => {
                reader.abort();
                return Err(McpError::Timeout {
                    method: "sse endpoint".to_string(),
                    timeout: connect_timeout,
                });
            }
        };
        tracing::debug!(server = server_id, %endpoint, "MCP SSE endpoint announced");

        Ok(Self {
            server_id: server_id.to_string(),
            http,
            headers,
            endpoint,
            reader: Mutex::new(Some(reader)),
        })
    }
}

impl Transport for SseTransport {
    fn send(&self, message: Value) -> BoxFuture<'_, Result<(), McpError>> {
        async move {
            let response = self
                .http
                .post(self.endpoint.clone())
                .headers(self.headers.clone())
                .json(&message)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(McpError::Status {
                    status: status.as_u16(),
                    message: response.text().await.unwrap_or_default().trim().to_string(),
                });
            }
            Ok(())
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            if let Some(reader) = lock_unpoisoned(&self.reader).take() {
                reader.abort();
                tracing::debug!(server = %self.server_id, "MCP event stream closed");
            }
        }
        .boxed()
    }
}
