use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How to reach one MCP server.
///
/// Accepts an explicit `"type": "stdio" | "http" | "sse"`. Without it, an
/// entry with `command` is stdio and an entry with `url` is streamable HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawServerConfig", into = "RawServerConfig")]
pub enum McpServerConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    Http {
        url: String,
        headers: BTreeMap<String, String>,
    },
    Sse {
        url: String,
        headers: BTreeMap<String, String>,
    },
}

impl McpServerConfig {
    #[must_use]
    pub fn stdio(command: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Stdio {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn http(url: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn sse(url: impl Into<String>) -> Self {
        Self::Sse {
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn transport_name(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
            Self::Sse { .. } => "sse",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServerConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
}

impl TryFrom<RawServerConfig> for McpServerConfig {
    type Error = String;

    fn try_from(raw: RawServerConfig) -> Result<Self, Self::Error> {
        let kind = match (raw.kind.as_deref(), &raw.command, &raw.url) {
            (Some(kind), _, _) => kind.to_ascii_lowercase(),
            (None, Some(_), None) => "stdio".to_string(),
            (None, None, Some(_)) => "http".to_string(),
            (None, Some(_), Some(_)) => return Err("set either `command` or `url`, not both".to_string()),
            (None, None, None) => return Err("missing `command` (stdio) or `url` (http/sse)".to_string()),
        };

        match kind.as_str() {
            "stdio" => {
                let command = raw
                    .command
                    .filter(|command| !command.trim().is_empty())
                    .ok_or("stdio server requires a non-empty `command`")?;
                if raw.url.is_some() || !raw.headers.is_empty() {
                    return Err("stdio server does not accept `url` or `headers`".to_string());
                }
                Ok(Self::Stdio {
                    command,
                    args: raw.args,
                    env: raw.env,
                })
            }
            "http" | "streamable-http" | "sse" => {
                let url = raw.url.ok_or_else(|| format!("{kind} server requires a `url`"))?;
                url::Url::parse(&url).map_err(|error| format!("invalid url '{url}': {error}"))?;
                if raw.command.is_some() || !raw.args.is_empty() || !raw.env.is_empty() {
                    return Err(format!("{kind} server does not accept `command`, `args` or `env`"));
                }
                Ok(if kind == "sse" {
                    Self::Sse {
                        url,
                        headers: raw.headers,
                    }
                } else {
                    Self::Http {
                        url,
                        headers: raw.headers,
                    }
                })
            }
            other => Err(format!("unknown server type '{other}' (expected stdio, http or sse)")),
        }
    }
}

impl From<McpServerConfig> for RawServerConfig {
    fn from(config: McpServerConfig) -> Self {
        match config {
            McpServerConfig::Stdio { command, args, env } => Self {
                kind: Some("stdio".to_string()),
                command: Some(command),
                args,
                env,
                ..Self::default()
            },
            McpServerConfig::Http { url, headers } => Self {
                kind: Some("http".to_string()),
                url: Some(url),
                headers,
                ..Self::default()
            },
            McpServerConfig::Sse { url, headers } => Self {
                kind: Some("sse".to_string()),
                url: Some(url),
                headers,
                ..Self::default()
            },
        }
    }
}

/// The `mcpServers` table. Iteration (and therefore connection order and
/// collision precedence) follows sorted server id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    pub servers: BTreeMap<String, McpServerConfig>,
}
