use agent_provider::ToolOrigin;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::ErrorReport;

/// Progress reported while a submission runs.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    TurnStarted { round: usize, provider_id: String },
    TextDelta(String),
    ReasoningDelta(String),
    ToolCallStarted {
        call_id: String,
        tool_name: String,
        origin: Option<ToolOrigin>,
    },
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        summary: String,
        is_error: bool,
    },
    TurnCompleted { stop_reason: Option<String> },
    ProviderSwitched { from: String, to: String },
    Error(ErrorReport),
}

/// Receiver for [`AgentEvent`]s. Delivery must not block.
pub trait EventSink {
    fn emit(&mut self, event: AgentEvent);
}

impl EventSink for Vec<AgentEvent> {
    fn emit(&mut self, event: AgentEvent) {
        self.push(event);
    }
}

impl EventSink for UnboundedSender<AgentEvent> {
    fn emit(&mut self, event: AgentEvent) {
        // A closed receiver means nobody is watching any more.
        let _ = self.send(event);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: AgentEvent) {}
}
