//! Minimal HTTP/1.1 plumbing for integration tests: read one request off a
//! socket, write a response back, and a server that replays a fixed list of
//! replies while recording what it was sent.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// One request as the server saw it.
#[derive(Clone, Debug, Default)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Body parsed as JSON; panics when it is not.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body is JSON")
    }

    /// `method` field of a JSON-RPC body, if any.
    pub fn rpc_method(&self) -> Option<String> {
        let body: serde_json::Value = serde_json::from_slice(&self.body).ok()?;
        body.get("method")?.as_str().map(str::to_string)
    }
}

/// Reads the request head and a `Content-Length` body.
pub async fn read_request(socket: &mut TcpStream) -> io::Result<CapturedRequest> {
    let mut raw = Vec::new();
    let mut buffer = [0_u8; 4096];
    let body_start = loop {
        let read = socket.read(&mut buffer).await?;
        if read == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        raw.extend_from_slice(&buffer[..read]);
        if let Some(at) = raw.windows(4).position(|window| window == b"\r\n\r\n") {
            break at + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..body_start]).into_owned();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();

    let mut request = CapturedRequest {
        method,
        path,
        headers,
        body: raw[body_start..].to_vec(),
    };
    let expected = request
        .header("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    while request.body.len() < expected {
        let read = socket.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        request.body.extend_from_slice(&buffer[..read]);
    }
    Ok(request)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        429 => "Too Many Requests",
        503 => "Service Unavailable",
        _ => "Error",
    }
}

/// Writes a complete response with a fixed body and closes the write half.
pub async fn respond(
    socket: &mut TcpStream,
    status: u16,
    content_type: &str,
    extra_headers: &[(&str, &str)],
    body: &[u8],
) -> io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n",
        reason(status),
        body.len()
    );
    for (name, value) in extra_headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    socket.write_all(head.as_bytes()).await?;
    socket.write_all(body).await?;
    socket.shutdown().await
}

/// Writes the head of an open-ended response; the body follows as raw writes.
pub async fn open_stream(socket: &mut TcpStream, status: u16, content_type: &str) -> io::Result<()> {
    let head = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
        reason(status)
    );
    socket.write_all(head.as_bytes()).await
}

/// `data:` frames, one per payload.
pub fn sse_frames(payloads: &[&str]) -> Vec<u8> {
    payloads
        .iter()
        .map(|payload| format!("data: {payload}\n\n"))
        .collect::<String>()
        .into_bytes()
}

/// A canned response. Body parts are written in order, each after its delay.
#[derive(Clone, Debug)]
pub struct Reply {
    status: u16,
    content_type: &'static str,
    parts: Vec<(Duration, Vec<u8>)>,
    drop_connection: bool,
}

impl Reply {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            parts: vec![(Duration::ZERO, body.as_bytes().to_vec())],
            drop_connection: false,
        }
    }

    pub fn sse(status: u16, payloads: &[&str]) -> Self {
        Self {
            status,
            content_type: "text/event-stream",
            parts: vec![(Duration::ZERO, sse_frames(payloads))],
            drop_connection: false,
        }
    }

    /// Appends more body after `delay`.
    pub fn then_after(mut self, delay: Duration, bytes: Vec<u8>) -> Self {
        self.parts.push((delay, bytes));
        self
    }

    /// Closes the connection without answering.
    pub fn reset() -> Self {
        Self {
            status: 0,
            content_type: "",
            parts: Vec::new(),
            drop_connection: true,
        }
    }

    async fn write_to(&self, socket: &mut TcpStream) -> io::Result<()> {
        if self.drop_connection {
            return Ok(());
        }
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
            self.status,
            reason(self.status),
            self.content_type
        );
        socket.write_all(head.as_bytes()).await?;
        for (delay, bytes) in &self.parts {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }
            socket.write_all(format!("{:X}\r\n", bytes.len()).as_bytes()).await?;
            socket.write_all(bytes).await?;
            socket.write_all(b"\r\n").await?;
        }
        socket.write_all(b"0\r\n\r\n").await?;
        socket.shutdown().await
    }
}

#[derive(Default)]
struct Recorded {
    served: AtomicUsize,
    requests: Mutex<Vec<CapturedRequest>>,
}

/// Answers the n-th request with the n-th reply; requests past the end get a
/// 500.
pub struct ScriptedServer {
    pub base_url: String,
    recorded: Arc<Recorded>,
    accept_loop: JoinHandle<()>,
}

impl ScriptedServer {
    pub async fn new(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback listener");
        let base_url = format!("http://{}", listener.local_addr().expect("listener address"));
        let recorded = Arc::new(Recorded::default());
        let replies = Arc::new(replies);

        let accept_loop = tokio::spawn({
            let recorded = Arc::clone(&recorded);
            async move {
                while let Ok((mut socket, _)) = listener.accept().await {
                    let recorded = Arc::clone(&recorded);
                    let replies = Arc::clone(&replies);
                    tokio::spawn(async move {
                        let Ok(request) = read_request(&mut socket).await else {
                            return;
                        };
                        recorded
                            .requests
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(request);
                        let index = recorded.served.fetch_add(1, Ordering::AcqRel);
                        let reply = replies
                            .get(index)
                            .cloned()
                            .unwrap_or_else(|| Reply::json(500, r#"{"error":{"message":"no scripted reply left"}}"#));
                        let _ = reply.write_to(&mut socket).await;
                    });
                }
            }
        });

        Self {
            base_url,
            recorded,
            accept_loop,
        }
    }

    pub fn request_count(&self) -> usize {
        self.recorded.served.load(Ordering::Acquire)
    }

    pub fn captured(&self) -> Vec<CapturedRequest> {
        self.recorded
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn shutdown(&self) {
        self.accept_loop.abort();
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}
