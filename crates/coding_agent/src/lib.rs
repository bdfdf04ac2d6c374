//! Coding agent: conversation orchestrator, native workspace tools and the
//! glue that wires providers, credentials and MCP servers into one session.
//!
//! ## Configuration
//!
//! The binary reads an [`AgentConfig`](config::AgentConfig) JSON file named by
//! `AGENT_ENGINE_CONFIG` (default `.agent/config.json` in the current
//! directory). `AGENT_ENGINE_PROVIDER` overrides the active provider and
//! `AGENT_ENGINE_SYSTEM_INSTRUCTIONS` the system prompt.
//!
//! ## Turn loop
//!
//! [`Orchestrator::submit`](orchestrator::Orchestrator::submit) appends the
//! user turn, streams the active provider's reply, resolves every requested
//! tool call in order and continues automatically until the model answers
//! without calling a tool. Cancellation leaves the transcript at its last
//! fully committed turn.
//!
//! ## Tools
//!
//! Native tools (`read_file`, `list_dir`, `grep_files`, `apply_patch`,
//! `shell`) are confined to the workspace root. MCP tools are merged in after
//! them; a server tool whose name a native tool already uses is rejected.

pub mod commands;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod providers;
pub mod tools;

pub use config::{AgentConfig, ConfigError, ProviderConfig};
pub use conversation::{Conversation, TranscriptSink};
pub use dispatch::{Resolution, ToolDispatcher};
pub use error::{AgentError, Component, ErrorKind, ErrorReport};
pub use events::{AgentEvent, EventSink, NullSink};
pub use orchestrator::{Orchestrator, OrchestratorSettings, SessionControl, SubmitOutcome};
pub use providers::{credential_manager, ProviderRegistry};
pub use tools::{NativeTools, ToolError, ToolLimits, ToolOutput};
