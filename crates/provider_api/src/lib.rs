//! HTTP/SSE wire layer for the three supported model provider protocols.
//!
//! This crate owns request payload shapes, header construction, and stream
//! event decoding for:
//!
//! - [`anthropic`]: the key-based Anthropic Messages API,
//! - [`codex`]: the OAuth-backed Codex Responses API,
//! - [`chat`]: OpenAI-compatible chat completions (GLM).
//!
//! It holds no credential state and never retries. Mapping transcripts into
//! payloads and decoded events into shared deltas is the adapters' job.

pub mod anthropic;
pub mod chat;
pub mod client;
pub mod codex;
pub mod error;
pub mod transient;
pub mod user_agent;

pub use client::{ApiClient, AuthScheme, FrameStream, RequestAuth};
pub use error::{parse_error_message, ApiError};
