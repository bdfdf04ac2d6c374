//! Process-level plumbing shared by the agent engine binaries: environment
//! configuration and logging setup.
//!
//! The engine itself lives in the workspace crates under `crates/`:
//! `agent_provider` defines the provider-neutral contract, `agent_providers`
//! and `provider_api` speak the provider wire protocols, `credentials` owns
//! API keys and OAuth tokens, `apply_patch_engine` edits files,
//! `mcp_client` talks to external tool servers, `session_store` persists
//! transcripts and `coding_agent` ties them together.

pub mod config;
pub mod logging;

pub use config::EnvConfig;
pub use logging::init_logging;
