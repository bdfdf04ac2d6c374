mod support;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use agent_provider::{new_cancel_signal, Turn};
use agent_provider_mock::ScriptedReply;
use coding_agent::conversation::INTERRUPTED_RESULT;
use coding_agent::dispatch::CANCELLED_RESULT;
use coding_agent::{Conversation, OrchestratorSettings, SubmitOutcome};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::tempdir;

use support::harness;

#[tokio::test]
async fn cancel_while_streaming_discards_the_partial_reply() {
    let workspace = tempdir().expect("temp workspace");
    let mut harness = harness(workspace.path(), &["mock"], OrchestratorSettings::default());
    harness.provider("mock").push_reply(
        ScriptedReply::default()
            .with_text("half an ")
            .with_pause(Duration::from_secs(30))
            .with_text("answer")
            .complete("end_turn"),
    );

    let cancel = new_cancel_signal();
    let mut events = Vec::new();
    let started = Instant::now();
    let (outcome, ()) = tokio::join!(harness.orchestrator.submit("hello", &cancel, &mut events), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.store(true, Ordering::Release);
    });

    assert_eq!(outcome, SubmitOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(harness.orchestrator.transcript(), &[Turn::user("hello")]);
    assert_eq!(support::text_of(&events), "half an ");
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_during_tool_resolution_closes_every_pending_call() {
    let workspace = tempdir().expect("temp workspace");
    let mut harness = harness(workspace.path(), &["mock"], OrchestratorSettings::default());
    harness.provider("mock").push_reply(
        ScriptedReply::default()
            .with_tool_call(0, "slow", "shell", json!({"command": "sleep 30"}))
            .with_tool_call(1, "never", "apply_patch", json!({"patch": "*** Begin Patch\n*** Add File: x.txt\n+x\n*** End Patch"}))
            .complete("tool_use"),
    );

    let cancel = new_cancel_signal();
    let started = Instant::now();
    let mut events = Vec::new();
    let (outcome, ()) = tokio::join!(harness.orchestrator.submit("run it", &cancel, &mut events), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.store(true, Ordering::Release);
    });

    assert_eq!(outcome, SubmitOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!workspace.path().join("x.txt").exists());
    assert_eq!(harness.provider("mock").requests().len(), 1);

    let transcript = harness.orchestrator.transcript();
    assert_eq!(transcript.len(), 5);
    for (turn, call_id) in transcript[3..].iter().zip(["slow", "never"]) {
        assert_eq!(
            turn,
            &Turn::ToolCallResult {
                call_id: call_id.to_string(),
                tool_name: if call_id == "slow" { "shell" } else { "apply_patch" }.to_string(),
                content: CANCELLED_RESULT.to_string(),
                is_error: true,
            }
        );
    }
}

#[tokio::test]
async fn cancelled_session_can_continue_with_the_next_message() {
    let workspace = tempdir().expect("temp workspace");
    let mut harness = harness(workspace.path(), &["mock"], OrchestratorSettings::default());
    let provider = harness.provider("mock").clone();

    let cancel = new_cancel_signal();
    cancel.store(true, Ordering::Release);
    let outcome = harness.orchestrator.submit("first", &cancel, &mut Vec::new()).await;
    assert_eq!(outcome, SubmitOutcome::Cancelled);
    assert_eq!(provider.requests().len(), 0);

    provider.push_reply(ScriptedReply::text("ok"));
    let outcome = harness
        .orchestrator
        .submit("second", &new_cancel_signal(), &mut Vec::new())
        .await;
    assert_eq!(outcome, SubmitOutcome::Completed);
    assert_eq!(
        provider.requests()[0].transcript,
        vec![Turn::user("first"), Turn::user("second")]
    );
}

#[test]
fn resumed_transcript_pairs_interrupted_calls() {
    let conversation = Conversation::resume(
        vec![
            Turn::user("go"),
            Turn::ToolCallRequest {
                call_id: "c1".to_string(),
                tool_name: "shell".to_string(),
                arguments: json!({"command": "make"}),
            },
        ],
        None,
    );
    assert_eq!(
        conversation.turns().last(),
        Some(&Turn::ToolCallResult {
            call_id: "c1".to_string(),
            tool_name: "shell".to_string(),
            content: INTERRUPTED_RESULT.to_string(),
            is_error: true,
        })
    );
}
