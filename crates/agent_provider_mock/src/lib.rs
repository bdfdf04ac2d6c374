//! Deterministic scripted implementation of the shared `agent_provider`
//! contract.
//!
//! Contains no transport or protocol logic. Each `send` consumes the next
//! scripted reply and records the request it was given, which makes it the
//! provider of choice for orchestrator tests and offline runs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agent_provider::{
    await_or_cancel, is_cancelled, CancelSignal, DeltaStream, ModelProvider, ProviderError, ProviderProfile,
    ProviderRequest, StreamDelta,
};
use futures_util::{stream, StreamExt};
use serde_json::Value;

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";
pub const MOCK_MODEL_ID: &str = "mock-model";

/// One element of a scripted reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    Delta(StreamDelta),
    /// Ends the reply with this error.
    Fail(ProviderError),
    /// Waits before the next step; cancellation is observed while waiting.
    Pause(Duration),
}

/// Steps returned for one `send` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptedReply {
    steps: Vec<ScriptStep>,
}

impl ScriptedReply {
    #[must_use]
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self { steps }
    }

    /// Streams `text` word by word, then completes with `end_turn`.
    #[must_use]
    pub fn text(text: &str) -> Self {
        Self::default().with_text(text).complete("end_turn")
    }

    /// A single tool call followed by completion with `tool_use`.
    #[must_use]
    pub fn tool_call(call_id: &str, tool_name: &str, arguments: Value) -> Self {
        Self::default()
            .with_tool_call(0, call_id, tool_name, arguments)
            .complete("tool_use")
    }

    #[must_use]
    pub fn failure(error: ProviderError) -> Self {
        Self::new(vec![ScriptStep::Fail(error)])
    }

    #[must_use]
    pub fn with_text(mut self, text: &str) -> Self {
        self.steps
            .extend(word_chunks(text).into_iter().map(|text| ScriptStep::Delta(StreamDelta::TextDelta { text })));
        self
    }

    /// Emits the call's arguments in two fragments so consumers have to
    /// reassemble them.
    #[must_use]
    pub fn with_tool_call(mut self, index: usize, call_id: &str, tool_name: &str, arguments: Value) -> Self {
        let arguments = arguments.to_string();
        let split = arguments.char_indices().nth(arguments.chars().count() / 2).map_or(0, |(at, _)| at);
        let (head, tail) = arguments.split_at(split);
        self.steps.push(ScriptStep::Delta(StreamDelta::ToolCallDelta {
            index,
            call_id: Some(call_id.to_string()),
            tool_name: Some(tool_name.to_string()),
            arguments: head.to_string(),
        }));
        self.steps.push(ScriptStep::Delta(StreamDelta::ToolCallDelta {
            index,
            call_id: None,
            tool_name: None,
            arguments: tail.to_string(),
        }));
        self
    }

    #[must_use]
    pub fn with_reasoning(mut self, payload: Value) -> Self {
        self.steps.push(ScriptStep::Delta(StreamDelta::Reasoning { payload }));
        self
    }

    #[must_use]
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.steps.push(ScriptStep::Pause(pause));
        self
    }

    #[must_use]
    pub fn with_step(mut self, step: ScriptStep) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn complete(mut self, stop_reason: &str) -> Self {
        self.steps.push(ScriptStep::Delta(StreamDelta::TurnComplete {
            stop_reason: Some(stop_reason.to_string()),
        }));
        self
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    replies: VecDeque<ScriptedReply>,
    requests: Vec<ProviderRequest>,
}

/// Scripted provider. Clones share the same script and request log.
#[derive(Debug, Clone)]
pub struct MockProvider {
    profile: ProviderProfile,
    state: Arc<Mutex<ScriptState>>,
}

impl MockProvider {
    #[must_use]
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self::with_profile(MOCK_PROVIDER_ID, MOCK_MODEL_ID, replies)
    }

    #[must_use]
    pub fn with_profile(provider_id: &str, default_model_id: &str, replies: Vec<ScriptedReply>) -> Self {
        Self {
            profile: ProviderProfile {
                provider_id: provider_id.to_string(),
                default_model_id: default_model_id.to_string(),
            },
            state: Arc::new(Mutex::new(ScriptState {
                replies: replies.into(),
                requests: Vec::new(),
            })),
        }
    }

    pub fn push_reply(&self, reply: ScriptedReply) {
        lock_unpoisoned(&self.state).replies.push_back(reply);
    }

    /// Requests whose streams were polled, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<ProviderRequest> {
        lock_unpoisoned(&self.state).requests.clone()
    }

    #[must_use]
    pub fn remaining_replies(&self) -> usize {
        lock_unpoisoned(&self.state).replies.len()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ModelProvider for MockProvider {
    fn profile(&self) -> ProviderProfile {
        self.profile.clone()
    }

    fn send(&self, request: ProviderRequest, cancel: CancelSignal) -> DeltaStream {
        let state = Arc::clone(&self.state);
        stream::once(async move {
            let mut state = lock_unpoisoned(&state);
            state.requests.push(request);
            state.replies.pop_front()
        })
        .flat_map(move |reply| match reply {
            Some(reply) => play(reply, cancel.clone()),
            None => stream::iter(vec![Err(ProviderError::Stream {
                message: "mock provider has no scripted reply left".to_string(),
            })])
            .boxed(),
        })
        .boxed()
    }
}

fn play(reply: ScriptedReply, cancel: CancelSignal) -> DeltaStream {
    let steps: VecDeque<ScriptStep> = reply.steps.into();
    stream::unfold((steps, cancel, false), |(mut steps, cancel, done)| async move {
        if done {
            return None;
        }
        loop {
            if is_cancelled(&cancel) {
                return Some((Err(ProviderError::Cancelled), (steps, cancel, true)));
            }
            match steps.pop_front()? {
                ScriptStep::Delta(delta) => {
                    tokio::task::yield_now().await;
                    return Some((Ok(delta), (steps, cancel, false)));
                }
                ScriptStep::Fail(error) => return Some((Err(error), (steps, cancel, true))),
                ScriptStep::Pause(pause) => {
                    if await_or_cancel(tokio::time::sleep(pause), &cancel).await.is_err() {
                        return Some((Err(ProviderError::Cancelled), (steps, cancel, true)));
                    }
                }
            }
        }
    })
    .boxed()
}

/// Splits on spaces and newlines, keeping the separator with the word.
fn word_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut pending = String::new();
    for ch in text.chars() {
        pending.push(ch);
        if matches!(ch, ' ' | '\n') {
            chunks.push(std::mem::take(&mut pending));
        }
    }
    if !pending.is_empty() {
        chunks.push(pending);
    }
    chunks
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use agent_provider::{new_cancel_signal, ModelProvider, ProviderError, ProviderRequest, StreamDelta, Turn};
    use assert_matches::assert_matches;
    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{word_chunks, MockProvider, ScriptedReply, MOCK_MODEL_ID, MOCK_PROVIDER_ID};

    fn request(text: &str) -> ProviderRequest {
        ProviderRequest {
            model_id: String::new(),
            instructions: "system".to_string(),
            transcript: vec![Turn::user(text)],
            tools: Vec::new(),
        }
    }

    #[test]
    fn profile_exposes_mock_identity() {
        let profile = MockProvider::default().profile();
        assert_eq!(profile.provider_id, MOCK_PROVIDER_ID);
        assert_eq!(profile.default_model_id, MOCK_MODEL_ID);
    }

    #[test]
    fn text_is_chunked_at_word_boundaries() {
        assert_eq!(word_chunks("one two\nthree"), ["one ", "two\n", "three"]);
        assert!(word_chunks("").is_empty());
    }

    #[tokio::test]
    async fn replies_are_consumed_in_order_and_requests_recorded() {
        let provider = MockProvider::new(vec![
            ScriptedReply::text("hello there"),
            ScriptedReply::tool_call("call_1", "read_file", json!({"path": "a.txt"})),
        ]);

        let first: Vec<_> = provider.send(request("one"), new_cancel_signal()).collect().await;
        assert_eq!(first.len(), 3);
        assert_matches!(first.last(), Some(Ok(StreamDelta::TurnComplete { stop_reason: Some(reason) })) if reason == "end_turn");

        let second: Vec<_> = provider.send(request("two"), new_cancel_signal()).collect().await;
        let arguments: String = second
            .iter()
            .filter_map(|delta| match delta {
                Ok(StreamDelta::ToolCallDelta { arguments, .. }) => Some(arguments.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(arguments, r#"{"path":"a.txt"}"#);

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].transcript, vec![Turn::user("two")]);
        assert_eq!(provider.remaining_replies(), 0);
    }

    #[tokio::test]
    async fn unpolled_stream_records_nothing() {
        let provider = MockProvider::new(vec![ScriptedReply::text("x")]);
        let stream = provider.send(request("one"), new_cancel_signal());
        drop(stream);
        assert!(provider.requests().is_empty());
        assert_eq!(provider.remaining_replies(), 1);
    }

    #[tokio::test]
    async fn exhausted_script_and_failures_surface_errors() {
        let provider = MockProvider::new(vec![ScriptedReply::failure(ProviderError::Status {
            status: 503,
            message: "overloaded".to_string(),
        })]);

        let first: Vec<_> = provider.send(request("one"), new_cancel_signal()).collect().await;
        assert_matches!(first.as_slice(), [Err(ProviderError::Status { status: 503, .. })]);

        let second: Vec<_> = provider.send(request("two"), new_cancel_signal()).collect().await;
        assert_matches!(second.as_slice(), [Err(ProviderError::Stream { .. })]);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_pause() {
        let provider = MockProvider::new(vec![ScriptedReply::default()
            .with_text("partial ")
            .with_pause(Duration::from_secs(30))
            .complete("end_turn")]);
        let cancel = new_cancel_signal();
        let mut stream = provider.send(request("one"), cancel.clone());

        assert_matches!(stream.next().await, Some(Ok(StreamDelta::TextDelta { .. })));
        cancel.store(true, Ordering::Release);
        assert_matches!(stream.next().await, Some(Err(ProviderError::Cancelled)));
        assert!(stream.next().await.is_none());
    }
}
