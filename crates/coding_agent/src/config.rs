//! Session configuration loaded from one JSON file.
//!
//! ```json
//! {
//!   "active_provider": "claude",
//!   "providers": {
//!     "claude": {"kind": "anthropic", "api_key_env": "ANTHROPIC_API_KEY"},
//!     "codex": {"kind": "codex", "model": "gpt-5.1-codex", "reasoning_effort": "medium"},
//!     "glm": {"kind": "chat_completions", "base_url": "https://api.z.ai/api/paas/v4", "api_key_env": "GLM_API_KEY"}
//!   },
//!   "mcpServers": {
//!     "docs": {"command": "docs-mcp", "args": ["--stdio"]}
//!   },
//!   "tools": {"shell_timeout_sec": 60},
//!   "max_rounds": 50
//! }
//! ```
//!
//! Unknown fields are rejected at every level.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_providers::{ProviderKind, ProviderSettings};
use mcp_client::{McpConfig, McpServerConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tools::ToolLimits;

pub const DEFAULT_MAX_ROUNDS: usize = 50;
pub const DEFAULT_SYSTEM_INSTRUCTIONS: &str = "You are a careful coding agent working inside the user's workspace. \
Use the tools to inspect files before changing them, prefer apply_patch for edits, \
and explain what you changed when you are done.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("no providers are configured")]
    NoProviders,
    #[error("active provider '{id}' is not configured; configured providers: {available}")]
    UnknownActiveProvider { id: String, available: String },
}

/// One configured model provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding an API key for this provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_provider: Option<String>,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    #[serde(default)]
    pub tools: ToolLimits,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_sec: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instructions: Option<String>,
}

fn default_max_rounds() -> usize {
    DEFAULT_MAX_ROUNDS
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            active_provider: None,
            providers: BTreeMap::new(),
            mcp_servers: BTreeMap::new(),
            tools: ToolLimits::default(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            request_timeout_sec: None,
            credentials_path: None,
            system_instructions: None,
        }
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        tracing::debug!(
            path = %path.display(),
            providers = config.providers.len(),
            mcp_servers = config.mcp_servers.len(),
            "loaded agent config"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::Invalid("max_rounds must be greater than 0".to_string()));
        }
        if self.request_timeout_sec == Some(0) {
            return Err(ConfigError::Invalid(
                "request_timeout_sec must be greater than 0 when provided".to_string(),
            ));
        }
        for (id, provider) in &self.providers {
            if id.trim().is_empty() {
                return Err(ConfigError::Invalid("provider ids must not be empty".to_string()));
            }
            if provider.max_tokens == Some(0) {
                return Err(ConfigError::Invalid(format!("providers.{id}.max_tokens must be greater than 0")));
            }
            if let Some(base_url) = &provider.base_url {
                if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                    return Err(ConfigError::Invalid(format!(
                        "providers.{id}.base_url must be an http(s) URL"
                    )));
                }
            }
        }
        if let Some(active) = &self.active_provider {
            if !self.providers.contains_key(active) {
                return Err(self.unknown_provider(active));
            }
        }
        Ok(())
    }

    /// `preferred` (e.g. from the environment), else `active_provider`, else
    /// the first configured provider in id order.
    pub fn active_provider_id(&self, preferred: Option<&str>) -> Result<String, ConfigError> {
        if let Some(id) = preferred.or(self.active_provider.as_deref()) {
            return if self.providers.contains_key(id) {
                Ok(id.to_string())
            } else {
                Err(self.unknown_provider(id))
            };
        }
        self.providers.keys().next().cloned().ok_or(ConfigError::NoProviders)
    }

    #[must_use]
    pub fn workspace_root(&self, cwd: &Path) -> PathBuf {
        match &self.workspace_root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => cwd.join(root),
            None => cwd.to_path_buf(),
        }
    }

    /// Configured path, else `$HOME/.agent_engine/credentials.json`, else a
    /// file under the workspace.
    #[must_use]
    pub fn credentials_path(&self, home: Option<&Path>, workspace_root: &Path) -> PathBuf {
        if let Some(path) = &self.credentials_path {
            return path.clone();
        }
        match home {
            Some(home) => home.join(".agent_engine").join("credentials.json"),
            None => workspace_root.join(".agent").join("credentials.json"),
        }
    }

    #[must_use]
    pub fn system_instructions(&self, preferred: Option<&str>) -> String {
        preferred
            .or(self.system_instructions.as_deref())
            .map(str::trim)
            .filter(|instructions| !instructions.is_empty())
            .unwrap_or(DEFAULT_SYSTEM_INSTRUCTIONS)
            .to_string()
    }

    #[must_use]
    pub fn mcp_config(&self) -> McpConfig {
        McpConfig {
            servers: self.mcp_servers.clone(),
        }
    }

    /// Adapter settings for provider `id`.
    #[must_use]
    pub fn provider_settings(&self, id: &str, session_id: Option<&str>) -> Option<ProviderSettings> {
        let provider = self.providers.get(id)?;
        let mut settings = ProviderSettings::new(id, provider.kind);
        if let Some(model) = &provider.model {
            settings = settings.with_model(model);
        }
        if let Some(base_url) = &provider.base_url {
            settings = settings.with_base_url(base_url);
        }
        if let Some(max_tokens) = provider.max_tokens {
            settings = settings.with_max_tokens(max_tokens);
        }
        if let Some(effort) = &provider.reasoning_effort {
            settings = settings.with_reasoning_effort(effort);
        }
        if let Some(timeout) = self.request_timeout_sec {
            settings = settings.with_request_timeout(Duration::from_secs(timeout));
        }
        if let Some(session_id) = session_id {
            settings = settings.with_session_id(session_id);
        }
        Some(settings)
    }

    fn unknown_provider(&self, id: &str) -> ConfigError {
        ConfigError::UnknownActiveProvider {
            id: id.to_string(),
            available: self.providers.keys().cloned().collect::<Vec<_>>().join(", "),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn parse(value: serde_json::Value) -> Result<AgentConfig, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn full_config_parses_with_defaults() {
        let config = parse(json!({
            "active_provider": "claude",
            "providers": {
                "claude": {"kind": "anthropic", "api_key_env": "ANTHROPIC_API_KEY", "max_tokens": 8192},
                "codex": {"kind": "codex", "reasoning_effort": "high"}
            },
            "mcpServers": {
                "docs": {"command": "docs-mcp"},
                "remote": {"type": "sse", "url": "http://127.0.0.1:9000/sse"}
            },
            "tools": {"grep_max_matches": 10}
        }))
        .expect("config parses");
        config.validate().expect("valid");

        assert_eq!(config.max_rounds, DEFAULT_MAX_ROUNDS);
        assert_eq!(config.tools.grep_max_matches, 10);
        assert_eq!(config.active_provider_id(None).expect("active"), "claude");
        assert_eq!(config.active_provider_id(Some("codex")).expect("override"), "codex");
        assert_eq!(config.mcp_config().servers.len(), 2);

        let settings = config.provider_settings("claude", Some("session-1")).expect("settings");
        assert_eq!(settings.kind, ProviderKind::Anthropic);
        assert_eq!(settings.max_tokens, Some(8192));
        assert_eq!(settings.session_id.as_deref(), Some("session-1"));
        assert!(config.provider_settings("missing", None).is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(parse(json!({"provider": "x"})).is_err());
        assert!(parse(json!({"providers": {"x": {"kind": "anthropic", "apikey": "k"}}})).is_err());
        assert!(parse(json!({"providers": {"x": {"kind": "gemini"}}})).is_err());
    }

    #[test]
    fn validation_catches_bad_values() {
        let config = parse(json!({"max_rounds": 0})).expect("parses");
        assert_matches!(config.validate(), Err(ConfigError::Invalid(_)));

        let config = parse(json!({"active_provider": "nope", "providers": {"a": {"kind": "codex"}}})).expect("parses");
        assert_matches!(config.validate(), Err(ConfigError::UnknownActiveProvider { id, available }) if id == "nope" && available == "a");

        let config = parse(json!({"providers": {"a": {"kind": "chat_completions", "base_url": "ftp://x"}}})).expect("parses");
        assert_matches!(config.validate(), Err(ConfigError::Invalid(_)));
    }

    #[test]
    fn active_provider_falls_back_to_first_id() {
        let config = parse(json!({"providers": {"zeta": {"kind": "codex"}, "alpha": {"kind": "anthropic"}}})).expect("parses");
        assert_eq!(config.active_provider_id(None).expect("fallback"), "alpha");
        assert_matches!(AgentConfig::default().active_provider_id(None), Err(ConfigError::NoProviders));
    }

    #[test]
    fn instructions_and_paths_resolve() {
        let config = AgentConfig {
            workspace_root: Some(PathBuf::from("project")),
            system_instructions: Some("  be brief  ".to_string()),
            ..AgentConfig::default()
        };
        assert_eq!(config.system_instructions(None), "be brief");
        assert_eq!(config.system_instructions(Some("override")), "override");
        assert_eq!(AgentConfig::default().system_instructions(Some("   ")), DEFAULT_SYSTEM_INSTRUCTIONS);
        assert_eq!(config.workspace_root(Path::new("/work")), PathBuf::from("/work/project"));
        assert_eq!(
            config.credentials_path(Some(Path::new("/home/u")), Path::new("/work")),
            PathBuf::from("/home/u/.agent_engine/credentials.json")
        );
        assert_eq!(
            config.credentials_path(None, Path::new("/work")),
            PathBuf::from("/work/.agent/credentials.json")
        );
    }

    #[test]
    fn load_reports_path_on_parse_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agent.json");
        std::fs::write(&path, "{not json").expect("write");
        assert_matches!(AgentConfig::load(&path), Err(ConfigError::Parse { path: reported, .. }) if reported == path);
        assert_matches!(AgentConfig::load(&dir.path().join("missing.json")), Err(ConfigError::Read { .. }));
    }
}
