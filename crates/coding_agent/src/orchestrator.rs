//! Conversation loop: send the transcript, stream the reply, resolve tool
//! calls, and keep going until the model answers without calling a tool.
//!
//! The transcript only ever grows by whole turns. A reply is buffered until
//! the provider signals completion; only then are its text, reasoning and
//! tool-call requests committed, followed by one result per request in
//! request order.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use agent_provider::{
    await_or_cancel, is_cancelled, CancelSignal, ModelProvider, ProviderError, ProviderRequest, StreamDelta,
    ToolCallRequest, Turn,
};
use futures_util::StreamExt;
use mcp_client::{RejectedTool, ToolCatalog};
use serde_json::Value;

use crate::config::{DEFAULT_MAX_ROUNDS, DEFAULT_SYSTEM_INSTRUCTIONS};
use crate::conversation::Conversation;
use crate::dispatch::{Resolution, ToolDispatcher};
use crate::error::{AgentError, Component, ErrorKind, ErrorReport};
use crate::events::{AgentEvent, EventSink};
use crate::providers::ProviderRegistry;

/// How a submission ended. The orchestrator is idle again in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Completed,
    Cancelled,
    Failed(ErrorReport),
    RoundLimitReached { rounds: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub instructions: String,
    /// Upper bound on provider requests per submission.
    pub max_rounds: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_SYSTEM_INSTRUCTIONS.to_string(),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

/// Handle for requesting changes from outside the running loop.
#[derive(Debug, Clone)]
pub struct SessionControl {
    known: Arc<Vec<String>>,
    pending_switch: Arc<Mutex<Option<String>>>,
}

impl SessionControl {
    /// Queues a provider switch. It applies before the next provider request,
    /// never while a turn is streaming or its tool calls are resolving.
    pub fn request_switch(&self, provider_id: &str) -> Result<(), AgentError> {
        if !self.known.iter().any(|known| known == provider_id) {
            return Err(AgentError::UnknownProvider {
                id: provider_id.to_string(),
                available: self.known.join(", "),
            });
        }
        *lock_unpoisoned(&self.pending_switch) = Some(provider_id.to_string());
        Ok(())
    }

    fn take_pending(&self) -> Option<String> {
        lock_unpoisoned(&self.pending_switch).take()
    }
}

#[derive(Debug, Default)]
struct PartialCall {
    call_id: Option<String>,
    tool_name: Option<String>,
    arguments: String,
}

struct PendingCall {
    request: ToolCallRequest,
    invalid: Option<String>,
}

struct AssembledReply {
    reasoning: Vec<Value>,
    text: String,
    calls: Vec<PendingCall>,
    stop_reason: Option<String>,
}

pub struct Orchestrator {
    providers: ProviderRegistry,
    active: String,
    tools: ToolDispatcher,
    conversation: Conversation,
    settings: OrchestratorSettings,
    control: SessionControl,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("active", &self.active)
            .field("providers", &self.providers)
            .field("conversation", &self.conversation)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        providers: ProviderRegistry,
        active: &str,
        tools: ToolDispatcher,
        conversation: Conversation,
        settings: OrchestratorSettings,
    ) -> Result<Self, AgentError> {
        let ids = providers.ids();
        if !providers.contains(active) {
            return Err(AgentError::UnknownProvider {
                id: active.to_string(),
                available: ids.join(", "),
            });
        }
        let settings = OrchestratorSettings {
            max_rounds: settings.max_rounds.max(1),
            ..settings
        };
        Ok(Self {
            providers,
            active: active.to_string(),
            tools,
            conversation,
            settings,
            control: SessionControl {
                known: Arc::new(ids),
                pending_switch: Arc::new(Mutex::new(None)),
            },
        })
    }

    #[must_use]
    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    #[must_use]
    pub fn active_provider(&self) -> &str {
        &self.active
    }

    #[must_use]
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.ids()
    }

    #[must_use]
    pub fn transcript(&self) -> &[Turn] {
        self.conversation.turns()
    }

    #[must_use]
    pub fn tools(&self) -> &ToolDispatcher {
        &self.tools
    }

    #[must_use]
    pub fn catalog(&self) -> Arc<ToolCatalog> {
        self.tools.catalog()
    }

    #[must_use]
    pub fn rejected_tools(&self) -> Vec<RejectedTool> {
        self.tools.catalog().rejected().to_vec()
    }

    /// Switches immediately. Requires the loop to be idle, which `&mut self`
    /// guarantees.
    pub fn switch_provider(&mut self, provider_id: &str) -> Result<(), AgentError> {
        if !self.providers.contains(provider_id) {
            return Err(AgentError::UnknownProvider {
                id: provider_id.to_string(),
                available: self.providers.ids().join(", "),
            });
        }
        if self.active != provider_id {
            tracing::info!(from = %self.active, to = %provider_id, "switched provider");
            self.active = provider_id.to_string();
        }
        Ok(())
    }

    /// Swaps in another transcript, returning the previous one. The active
    /// provider and tool set are kept.
    pub fn replace_conversation(&mut self, conversation: Conversation) -> Conversation {
        tracing::info!(turns = conversation.turns().len(), "replaced conversation");
        std::mem::replace(&mut self.conversation, conversation)
    }

    /// Commits `input` as a user turn and runs the loop until the model stops
    /// calling tools, the request fails, or `cancel` is set.
    pub async fn submit(&mut self, input: &str, cancel: &CancelSignal, sink: &mut dyn EventSink) -> SubmitOutcome {
        self.conversation.commit([Turn::user(input)]);
        self.run(cancel, sink).await
    }

    /// Re-issues the request for the committed transcript without adding a
    /// user turn. Used after a failed or cancelled submission.
    pub async fn retry(&mut self, cancel: &CancelSignal, sink: &mut dyn EventSink) -> Result<SubmitOutcome, AgentError> {
        if self.conversation.is_empty() {
            return Err(AgentError::NothingToRetry);
        }
        Ok(self.run(cancel, sink).await)
    }

    async fn run(&mut self, cancel: &CancelSignal, sink: &mut dyn EventSink) -> SubmitOutcome {
        for round in 1..=self.settings.max_rounds {
            self.apply_pending_switch(sink);
            if is_cancelled(cancel) {
                return SubmitOutcome::Cancelled;
            }
            let Some(provider) = self.providers.get(&self.active) else {
                let report = ErrorReport::new(
                    ErrorKind::TransportError,
                    Component::Orchestrator,
                    format!("active provider '{}' is not registered", self.active),
                )
                .unusable();
                sink.emit(AgentEvent::Error(report.clone()));
                return SubmitOutcome::Failed(report);
            };

            sink.emit(AgentEvent::TurnStarted {
                round,
                provider_id: self.active.clone(),
            });
            let reply = match self.stream_reply(provider.as_ref(), round, cancel, sink).await {
                Ok(reply) => reply,
                Err(ProviderError::Cancelled) => {
                    tracing::info!(provider = %self.active, round, "turn cancelled while streaming");
                    return SubmitOutcome::Cancelled;
                }
                Err(error) => {
                    tracing::warn!(provider = %self.active, round, %error, "provider request failed");
                    let report = ErrorReport::from_provider(&error);
                    sink.emit(AgentEvent::Error(report.clone()));
                    return SubmitOutcome::Failed(report);
                }
            };

            let has_calls = !reply.calls.is_empty();
            self.commit_reply(&reply);
            sink.emit(AgentEvent::TurnCompleted {
                stop_reason: reply.stop_reason.clone(),
            });
            if !has_calls {
                return SubmitOutcome::Completed;
            }
            if self.resolve_calls(reply.calls, cancel, sink).await {
                return SubmitOutcome::Cancelled;
            }
        }

        tracing::warn!(rounds = self.settings.max_rounds, "stopped after reaching the round limit");
        SubmitOutcome::RoundLimitReached {
            rounds: self.settings.max_rounds,
        }
    }

    fn apply_pending_switch(&mut self, sink: &mut dyn EventSink) {
        let Some(target) = self.control.take_pending() else {
            return;
        };
        if target == self.active {
            return;
        }
        let from = std::mem::replace(&mut self.active, target.clone());
        tracing::info!(%from, to = %target, "applied queued provider switch");
        sink.emit(AgentEvent::ProviderSwitched { from, to: target });
    }

    /// Reasoning state is only meaningful to the provider that produced it.
    fn request_transcript(&self) -> Vec<Turn> {
        self.conversation
            .turns()
            .iter()
            .filter(|turn| match turn {
                Turn::Reasoning { provider_id, .. } => *provider_id == self.active,
                _ => true,
            })
            .cloned()
            .collect()
    }

    async fn stream_reply(
        &self,
        provider: &dyn ModelProvider,
        round: usize,
        cancel: &CancelSignal,
        sink: &mut dyn EventSink,
    ) -> Result<AssembledReply, ProviderError> {
        let request = ProviderRequest {
            model_id: provider.profile().default_model_id,
            instructions: self.settings.instructions.clone(),
            transcript: self.request_transcript(),
            tools: self.tools.descriptors(),
        };
        tracing::debug!(
            provider = %self.active,
            model = %request.model_id,
            turns = request.transcript.len(),
            tools = request.tools.len(),
            round,
            "sending provider request"
        );

        let mut stream = provider.send(request, cancel.clone());
        let mut text = String::new();
        let mut reasoning = Vec::new();
        let mut partial: BTreeMap<usize, PartialCall> = BTreeMap::new();

        let stop_reason = loop {
            let next = await_or_cancel(stream.next(), cancel).await?;
            match next {
                None => return Err(ProviderError::decode("stream ended before the turn completed")),
                Some(Err(error)) => return Err(error),
                Some(Ok(delta)) => match delta {
                    StreamDelta::TextDelta { text: chunk } => {
                        text.push_str(&chunk);
                        sink.emit(AgentEvent::TextDelta(chunk));
                    }
                    StreamDelta::ReasoningText { text: chunk } => sink.emit(AgentEvent::ReasoningDelta(chunk)),
                    StreamDelta::ToolCallDelta {
                        index,
                        call_id,
                        tool_name,
                        arguments,
                    } => {
                        let call = partial.entry(index).or_default();
                        if call_id.is_some() {
                            call.call_id = call_id;
                        }
                        if tool_name.is_some() {
                            call.tool_name = tool_name;
                        }
                        call.arguments.push_str(&arguments);
                    }
                    StreamDelta::Reasoning { payload } => reasoning.push(payload),
                    StreamDelta::TurnComplete { stop_reason } => break stop_reason,
                },
            }
        };

        let calls = partial
            .into_iter()
            .map(|(index, call)| assemble_call(round, index, call))
            .collect();
        Ok(AssembledReply {
            reasoning,
            text,
            calls,
            stop_reason,
        })
    }

    fn commit_reply(&mut self, reply: &AssembledReply) {
        let mut turns: Vec<Turn> = reply
            .reasoning
            .iter()
            .map(|payload| Turn::Reasoning {
                provider_id: self.active.clone(),
                payload: payload.clone(),
            })
            .collect();
        if !reply.text.is_empty() {
            turns.push(Turn::assistant(reply.text.clone()));
        }
        turns.extend(reply.calls.iter().map(|call| Turn::ToolCallRequest {
            call_id: call.request.call_id.clone(),
            tool_name: call.request.tool_name.clone(),
            arguments: call.request.arguments.clone(),
        }));
        self.conversation.commit(turns);
    }

    /// Resolves calls in request order, committing each result before the
    /// next call starts. Returns true when cancellation cut resolution short;
    /// the remaining calls still get a result.
    async fn resolve_calls(&mut self, calls: Vec<PendingCall>, cancel: &CancelSignal, sink: &mut dyn EventSink) -> bool {
        let mut cancelled = false;
        for call in calls {
            let ToolCallRequest { call_id, tool_name, .. } = &call.request;
            let resolution = if cancelled || is_cancelled(cancel) {
                Resolution::cancelled(tool_name)
            } else {
                sink.emit(AgentEvent::ToolCallStarted {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    origin: self.tools.origin(tool_name),
                });
                match &call.invalid {
                    Some(message) => Resolution {
                        content: message.clone(),
                        summary: format!("{tool_name} (invalid arguments)"),
                        is_error: true,
                        cancelled: false,
                        error: None,
                    },
                    None => self.tools.dispatch(&call.request, cancel).await,
                }
            };
            cancelled |= resolution.cancelled;

            if let Some(report) = &resolution.error {
                sink.emit(AgentEvent::Error(report.clone()));
            }
            self.conversation.commit([Turn::ToolCallResult {
                call_id: call_id.clone(),
                tool_name: tool_name.clone(),
                content: resolution.content,
                is_error: resolution.is_error,
            }]);
            sink.emit(AgentEvent::ToolCallFinished {
                call_id: call_id.clone(),
                tool_name: tool_name.clone(),
                summary: resolution.summary,
                is_error: resolution.is_error,
            });
        }
        cancelled
    }
}

fn assemble_call(round: usize, index: usize, call: PartialCall) -> PendingCall {
    let call_id = call
        .call_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("call_{round}_{index}"));
    let tool_name = call.tool_name.unwrap_or_default();

    let raw = call.arguments.trim();
    let parsed = if raw.is_empty() {
        Ok(Value::Object(serde_json::Map::new()))
    } else {
        serde_json::from_str::<Value>(raw)
    };
    let (arguments, invalid) = match parsed {
        Ok(arguments) => (arguments, None),
        Err(error) => {
            tracing::warn!(%call_id, tool = %tool_name, %error, "tool call arguments are not valid JSON");
            (
                Value::String(call.arguments.clone()),
                Some(format!("invalid JSON arguments for {tool_name}: {error}")),
            )
        }
    };
    let invalid = if tool_name.is_empty() {
        Some("tool call did not name a tool".to_string())
    } else {
        invalid
    };

    PendingCall {
        request: ToolCallRequest {
            call_id,
            tool_name,
            arguments,
        },
        invalid,
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
