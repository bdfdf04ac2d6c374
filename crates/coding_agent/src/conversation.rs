use std::collections::HashSet;

use agent_provider::Turn;
use session_store::{SessionStore, SessionStoreError};

pub const INTERRUPTED_RESULT: &str = "tool call was interrupted before it produced a result";

/// Durable destination for committed turns.
pub trait TranscriptSink: Send {
    fn append(&mut self, turn: &Turn) -> Result<(), SessionStoreError>;
}

impl TranscriptSink for SessionStore {
    fn append(&mut self, turn: &Turn) -> Result<(), SessionStoreError> {
        self.append_turn(turn).map(|_| ())
    }
}

/// Committed transcript. Turns only enter through [`Conversation::commit`],
/// so a partially streamed reply is never visible here.
#[derive(Default)]
pub struct Conversation {
    turns: Vec<Turn>,
    sink: Option<Box<dyn TranscriptSink>>,
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("turns", &self.turns.len())
            .field("persistent", &self.sink.is_some())
            .finish()
    }
}

impl Conversation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sink(sink: Box<dyn TranscriptSink>) -> Self {
        Self {
            turns: Vec::new(),
            sink: Some(sink),
        }
    }

    /// Continues from previously committed `turns`. Tool calls that never got
    /// a result (the process died mid-resolution) are closed with an error
    /// result so every request is paired again.
    #[must_use]
    pub fn resume(turns: Vec<Turn>, sink: Option<Box<dyn TranscriptSink>>) -> Self {
        let mut conversation = Self { turns, sink };
        let repairs = unmatched_calls(&conversation.turns);
        if !repairs.is_empty() {
            tracing::info!(count = repairs.len(), "closing interrupted tool calls from resumed transcript");
        }
        conversation.commit(repairs);
        conversation
    }

    /// Replays the current branch of `store` and keeps appending to it.
    pub fn from_store(store: SessionStore) -> Result<Self, SessionStoreError> {
        let turns = store.replay_leaf(None)?;
        tracing::info!(path = %store.path().display(), turns = turns.len(), "resumed session");
        Ok(Self::resume(turns, Some(Box::new(store))))
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Appends `turns` in order. The in-memory transcript is authoritative; a
    /// persistence failure is logged and the session carries on.
    pub fn commit(&mut self, turns: impl IntoIterator<Item = Turn>) {
        for turn in turns {
            if let Some(sink) = self.sink.as_mut() {
                if let Err(error) = sink.append(&turn) {
                    tracing::warn!(%error, "failed to persist transcript turn");
                }
            }
            self.turns.push(turn);
        }
    }
}

fn unmatched_calls(turns: &[Turn]) -> Vec<Turn> {
    let answered: HashSet<&str> = turns
        .iter()
        .filter_map(|turn| match turn {
            Turn::ToolCallResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
        .collect();
    turns
        .iter()
        .filter_map(|turn| match turn {
            Turn::ToolCallRequest { call_id, tool_name, .. } if !answered.contains(call_id.as_str()) => {
                Some(Turn::ToolCallResult {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    content: INTERRUPTED_RESULT.to_string(),
                    is_error: true,
                })
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[derive(Clone, Default)]
    struct Recorder {
        turns: Arc<Mutex<Vec<Turn>>>,
        fail: bool,
    }

    impl TranscriptSink for Recorder {
        fn append(&mut self, turn: &Turn) -> Result<(), SessionStoreError> {
            if self.fail {
                return Err(SessionStoreError::io(
                    "appending session entry",
                    "/dev/full",
                    std::io::Error::other("disk full"),
                ));
            }
            self.turns.lock().expect("recorder lock").push(turn.clone());
            Ok(())
        }
    }

    fn request(call_id: &str) -> Turn {
        Turn::ToolCallRequest {
            call_id: call_id.to_string(),
            tool_name: "shell".to_string(),
            arguments: json!({"command": "true"}),
        }
    }

    #[test]
    fn commit_persists_in_order() {
        let recorder = Recorder::default();
        let mut conversation = Conversation::with_sink(Box::new(recorder.clone()));
        conversation.commit([Turn::user("hi"), Turn::assistant("hello")]);

        assert_eq!(conversation.turns(), &[Turn::user("hi"), Turn::assistant("hello")]);
        assert_eq!(*recorder.turns.lock().expect("lock"), conversation.turns().to_vec());
    }

    #[test]
    fn persistence_failure_keeps_the_turn_in_memory() {
        let recorder = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let mut conversation = Conversation::with_sink(Box::new(recorder));
        conversation.commit([Turn::user("hi")]);
        assert_eq!(conversation.turns().len(), 1);
    }

    #[test]
    fn resume_closes_unanswered_tool_calls() {
        let answered = Turn::ToolCallResult {
            call_id: "a".to_string(),
            tool_name: "shell".to_string(),
            content: "ok".to_string(),
            is_error: false,
        };
        let conversation = Conversation::resume(vec![Turn::user("go"), request("a"), answered.clone(), request("b")], None);

        assert_eq!(conversation.turns().len(), 5);
        assert_eq!(
            conversation.turns()[4],
            Turn::ToolCallResult {
                call_id: "b".to_string(),
                tool_name: "shell".to_string(),
                content: INTERRUPTED_RESULT.to_string(),
                is_error: true,
            }
        );
    }
}
