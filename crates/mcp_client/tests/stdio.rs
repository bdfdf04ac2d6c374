#![cfg(unix)]

use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

use agent_provider::new_cancel_signal;
use assert_matches::assert_matches;
use mcp_client::{
    ConnectionState, McpConfig, McpError, McpManager, McpServerConfig, McpSettings, RejectionReason,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

const SCRIPT: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"script","version":"0.1"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo the input","inputSchema":{"type":"object"}},{"name":"slow"},{"name":"crash"}]}}\n' "$id" ;;
    *'"name":"crash"'*)
      exit 1 ;;
    *'"name":"slow"'*)
      ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info","data":"calling echo"}}\n'
      printf '{"jsonrpc":"2.0","id":"srv-1","method":"ping"}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"echoed"}],"isError":false}}\n' "$id" ;;
  esac
done
"#;

fn write_script(dir: &Path) -> String {
    let path = dir.join("server.sh");
    std::fs::write(&path, SCRIPT).expect("write script");
    path.display().to_string()
}

fn config(entries: &[(&str, McpServerConfig)]) -> McpConfig {
    McpConfig {
        servers: entries.iter().cloned().map(|(id, server)| (id.to_string(), server)).collect(),
    }
}

fn settings() -> McpSettings {
    McpSettings::default()
        .with_handshake_timeout(Duration::from_secs(5))
        .with_request_timeout(Duration::from_secs(5))
}

async fn wait_for_state(manager: &McpManager, server: &str, expected: ConnectionState) {
    for _ in 0..200 {
        if manager.state(server) == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{server} never reached {expected}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stdio_server_handshakes_and_answers_calls() {
    let dir = TempDir::new().expect("temp dir");
    let script = write_script(dir.path());
    let manager = McpManager::start(
        &config(&[("script", McpServerConfig::stdio("sh", [script]))]),
        Vec::new(),
        settings(),
    )
    .await;

    assert_eq!(manager.state("script"), Some(ConnectionState::Ready));
    let statuses = manager.statuses();
    assert_eq!(statuses[0].transport, "stdio");
    assert_eq!(statuses[0].tool_count, 3);
    assert_eq!(statuses[0].server_name.as_deref(), Some("script"));

    let catalog = manager.catalog();
    let echo = catalog.get("echo").expect("echo is listed");
    assert_eq!(echo.descriptor().description, "Echo the input");

    let output = manager
        .call_tool("script", "echo", json!({"text": "hi"}), &new_cancel_signal())
        .await
        .expect("call succeeds");
    assert_eq!(output.content, "echoed");
    assert!(!output.is_error);

    manager.shutdown().await;
    assert_eq!(manager.state("script"), Some(ConnectionState::Closed));
    assert!(manager.catalog().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crashed_server_drops_out_of_the_catalog() {
    let dir = TempDir::new().expect("temp dir");
    let script = write_script(dir.path());
    let manager = McpManager::start(
        &config(&[("script", McpServerConfig::stdio("sh", [script]))]),
        Vec::new(),
        settings(),
    )
    .await;
    assert!(!manager.catalog().is_empty());

    let error = manager
        .call_tool("script", "crash", json!({}), &new_cancel_signal())
        .await
        .unwrap_err();
    assert_matches!(error, McpError::Closed(_));

    wait_for_state(&manager, "script", ConnectionState::Closed).await;
    for _ in 0..200 {
        if manager.catalog().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(manager.catalog().is_empty());
    assert!(manager.statuses()[0].last_error.is_some());

    let error = manager
        .call_tool("script", "echo", json!({}), &new_cancel_signal())
        .await
        .unwrap_err();
    assert_matches!(
        error,
        McpError::Unavailable {
            state: ConnectionState::Closed,
            ..
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_call_returns_promptly() {
    let dir = TempDir::new().expect("temp dir");
    let script = write_script(dir.path());
    let manager = McpManager::start(
        &config(&[("script", McpServerConfig::stdio("sh", [script]))]),
        Vec::new(),
        settings(),
    )
    .await;

    let cancel = new_cancel_signal();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.store(true, Ordering::Release);
    });

    let started = std::time::Instant::now();
    let error = manager.call_tool("script", "slow", json!({}), &cancel).await.unwrap_err();
    assert_eq!(error, McpError::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(manager.state("script"), Some(ConnectionState::Ready));

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn collisions_are_resolved_by_native_names_then_server_order() {
    let dir = TempDir::new().expect("temp dir");
    let script = write_script(dir.path());
    let manager = McpManager::start(
        &config(&[
            ("beta", McpServerConfig::stdio("sh", [script.clone()])),
            ("alpha", McpServerConfig::stdio("sh", [script])),
        ]),
        vec!["echo".to_string()],
        settings(),
    )
    .await;

    let catalog = manager.catalog();
    let owners: Vec<(&str, &str)> = catalog
        .entries()
        .iter()
        .map(|entry| (entry.tool.name.as_str(), entry.server_id.as_str()))
        .collect();
    assert_eq!(owners, vec![("slow", "alpha"), ("crash", "alpha")]);

    let rejected: Vec<(&str, &str, &RejectionReason)> = catalog
        .rejected()
        .iter()
        .map(|tool| (tool.server_id.as_str(), tool.tool_name.as_str(), &tool.reason))
        .collect();
    let duplicate = RejectionReason::DuplicateOf {
        server_id: "alpha".to_string(),
    };
    assert_eq!(
        rejected,
        vec![
            ("alpha", "echo", &RejectionReason::ShadowsNative),
            ("beta", "echo", &RejectionReason::ShadowsNative),
            ("beta", "slow", &duplicate),
            ("beta", "crash", &duplicate),
        ]
    );

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_servers_degrade_without_blocking_others() {
    let dir = TempDir::new().expect("temp dir");
    let script = write_script(dir.path());
    let manager = McpManager::start(
        &config(&[
            ("good", McpServerConfig::stdio("sh", [script])),
            ("missing", McpServerConfig::stdio("/nonexistent/mcp-server", Vec::<String>::new())),
            ("silent", McpServerConfig::stdio("sh", ["-c", "sleep 5"])),
        ]),
        Vec::new(),
        McpSettings::default().with_handshake_timeout(Duration::from_millis(300)),
    )
    .await;

    assert_eq!(manager.state("good"), Some(ConnectionState::Ready));
    assert_eq!(manager.state("missing"), Some(ConnectionState::Degraded));
    assert_eq!(manager.state("silent"), Some(ConnectionState::Degraded));

    let statuses = manager.statuses();
    let missing = statuses.iter().find(|status| status.server_id == "missing").expect("listed");
    assert!(missing.last_error.as_deref().is_some_and(|error| error.contains("failed to start")));
    let silent = statuses.iter().find(|status| status.server_id == "silent").expect("listed");
    assert!(silent.last_error.as_deref().is_some_and(|error| error.contains("timed out")));

    assert_eq!(manager.catalog().entries().len(), 3);
    manager.shutdown().await;
}
