use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;

use super::{forward_payload, InboundSender, Transport, TransportEvent};
use crate::error::McpError;

const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Child process speaking newline-delimited JSON on stdin/stdout. Its stderr
/// is forwarded to the log.
pub(crate) struct StdioTransport {
    server_id: String,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
}

impl StdioTransport {
    pub(crate) fn spawn(
        server_id: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        inbound: InboundSender,
    ) -> Result<Self, McpError> {
        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/c").arg(command);
            cmd
        } else {
            Command::new(command)
        };
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let spawn_error = |message: String| McpError::Spawn {
            server: server_id.to_string(),
            message,
        };
        let mut child = cmd.spawn().map_err(|error| spawn_error(format!("{command}: {error}")))?;
        let stdin = child.stdin.take().ok_or_else(|| spawn_error("stdin was not captured".to_string()))?;
        let stdout = child.stdout.take().ok_or_else(|| spawn_error("stdout was not captured".to_string()))?;
        tracing::debug!(server = server_id, command, pid = child.id(), "spawned MCP server");

        if let Some(stderr) = child.stderr.take() {
            let server = server_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "stderr: {line}");
                }
            });
        }

        let server = server_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let reason = loop {
                match lines.next_line().await {
                    Ok(Some(line)) => forward_payload(&server, &line, &inbound),
                    Ok(None) => break "server process closed its output".to_string(),
                    Err(error) => break format!("failed to read server output: {error}"),
                };
            };
            let _ = inbound.send(TransportEvent::Closed(reason));
        });

        Ok(Self {
            server_id: server_id.to_string(),
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
        })
    }
}

impl Transport for StdioTransport {
    fn send(&self, message: Value) -> BoxFuture<'_, Result<(), McpError>> {
        async move {
            let mut line = serde_json::to_string(&message)?;
            line.push('\n');
            let mut stdin = self.stdin.lock().await;
            let Some(pipe) = stdin.as_mut() else {
                return Err(McpError::Closed("stdin already closed".to_string()));
            };
            pipe.write_all(line.as_bytes())
                .await
                .map_err(|error| McpError::Transport(format!("failed to write to server stdin: {error}")))?;
            pipe.flush()
                .await
                .map_err(|error| McpError::Transport(format!("failed to flush server stdin: {error}")))
        }
        .boxed()
    }

    /// Closes stdin, gives the server a moment to exit, then kills it.
    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            self.stdin.lock().await.take();
            let Some(mut child) = self.child.lock().await.take() else {
                return;
            };
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(server = %self.server_id, %status, "MCP server exited"),
                _ => {
                    if let Err(error) = child.kill().await {
                        tracing::warn!(server = %self.server_id, %error, "failed to kill MCP server");
                    }
                }
            }
        }
        .boxed()
    }
}
