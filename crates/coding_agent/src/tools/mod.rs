//! Native tool set: file inspection, search, patching, one-shot shell
//! commands and interactive shell sessions, confined to one workspace root.
//!
//! Every path argument goes through [`Sandbox`] before anything touches the
//! filesystem, so a path that escapes the root fails with
//! [`ToolError::SandboxViolation`] and nothing is read or written. Tools are
//! synchronous; callers run them on a blocking thread and pass the turn's
//! cancel flag so long-running work (shell commands, multi-file patches) can
//! stop early.

mod exec;
mod fs;
mod patch;
mod sandbox;
mod shell;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_provider::{CancelSignal, ToolDescriptor};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

pub use sandbox::Sandbox;

pub const READ_FILE: &str = "read_file";
pub const LIST_DIR: &str = "list_dir";
pub const GREP_FILES: &str = "grep_files";
pub const APPLY_PATCH: &str = "apply_patch";
pub const SHELL: &str = "shell";
pub const EXEC_COMMAND: &str = "exec_command";
pub const WRITE_STDIN: &str = "write_stdin";

/// Names of every native tool, in the order they are offered to the model.
pub const NATIVE_TOOL_NAMES: [&str; 7] = [READ_FILE, LIST_DIR, GREP_FILES, APPLY_PATCH, SHELL, EXEC_COMMAND, WRITE_STDIN];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("sandbox violation: '{path}' resolves outside the workspace root")]
    SandboxViolation { path: String },
    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: &'static str, message: String },
    #[error("'{path}' does not exist")]
    NotFound { path: String },
    #[error("{0}")]
    PatchConflict(String),
    #[error("{0}")]
    PatchFailed(String),
    #[error("{0}")]
    Failed(String),
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("tool call was cancelled")]
    Cancelled,
}

impl ToolError {
    fn invalid(tool: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool,
            message: message.into(),
        }
    }
}

/// Result of a successful tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Full result returned to the model.
    pub content: String,
    /// One line for the user, e.g. `list_dir . (4 entries)`.
    pub summary: String,
}

impl ToolOutput {
    #[must_use]
    pub fn new(content: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            summary: summary.into(),
        }
    }
}

/// Output and time bounds applied to native tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolLimits {
    pub read_max_bytes: usize,
    pub list_max_entries: usize,
    pub grep_max_matches: usize,
    pub grep_max_file_bytes: u64,
    pub shell_timeout_sec: u64,
    pub shell_max_timeout_sec: u64,
    pub shell_max_output_bytes: usize,
    /// How long `exec_command`/`write_stdin` wait for output by default.
    pub exec_yield_ms: u64,
    pub exec_max_yield_ms: u64,
    pub exec_max_sessions: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            read_max_bytes: 64 * 1024,
            list_max_entries: 500,
            grep_max_matches: 200,
            grep_max_file_bytes: 1024 * 1024,
            shell_timeout_sec: 30,
            shell_max_timeout_sec: 600,
            shell_max_output_bytes: 100 * 1024,
            exec_yield_ms: 1_000,
            exec_max_yield_ms: 30_000,
            exec_max_sessions: 8,
        }
    }
}

/// The native tool registry bound to one workspace root. Clones share the
/// same interactive sessions.
#[derive(Debug, Clone)]
pub struct NativeTools {
    sandbox: Sandbox,
    limits: ToolLimits,
    sessions: Arc<exec::ExecSessions>,
}

impl NativeTools {
    pub fn new(workspace_root: impl Into<PathBuf>, limits: ToolLimits) -> Result<Self, ToolError> {
        Ok(Self {
            sandbox: Sandbox::new(&workspace_root.into())?,
            limits,
            sessions: Arc::default(),
        })
    }

    /// Ids of interactive sessions that are still running.
    #[must_use]
    pub fn running_sessions(&self) -> Vec<u32> {
        self.sessions.ids()
    }

    /// Kills every interactive session.
    pub fn stop_sessions(&self) {
        self.sessions.kill_all();
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    #[must_use]
    pub fn limits(&self) -> &ToolLimits {
        &self.limits
    }

    #[must_use]
    pub fn is_native(name: &str) -> bool {
        NATIVE_TOOL_NAMES.contains(&name)
    }

    #[must_use]
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        NATIVE_TOOL_NAMES
            .iter()
            .map(|name| {
                let (description, schema) = describe(name);
                ToolDescriptor::native(*name, description, schema)
            })
            .collect()
    }

    /// Runs one native tool. Blocks until the tool finishes or observes
    /// `cancel`.
    pub fn execute(&self, name: &str, arguments: &Value, cancel: &CancelSignal) -> Result<ToolOutput, ToolError> {
        tracing::debug!(tool = name, "executing native tool");
        match name {
            READ_FILE => fs::read_file(&self.sandbox, &self.limits, parse_args(READ_FILE, arguments)?),
            LIST_DIR => fs::list_dir(&self.sandbox, &self.limits, parse_args(LIST_DIR, arguments)?),
            GREP_FILES => fs::grep_files(&self.sandbox, &self.limits, parse_args(GREP_FILES, arguments)?),
            APPLY_PATCH => patch::apply_patch(&self.sandbox, parse_args(APPLY_PATCH, arguments)?, cancel),
            SHELL => shell::run(&self.sandbox, &self.limits, parse_args(SHELL, arguments)?, cancel),
            EXEC_COMMAND => self
                .sessions
                .exec_command(&self.sandbox, &self.limits, parse_args(EXEC_COMMAND, arguments)?, cancel),
            WRITE_STDIN => self
                .sessions
                .write_stdin(&self.limits, parse_args(WRITE_STDIN, arguments)?, cancel),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

fn parse_args<T: DeserializeOwned>(tool: &'static str, arguments: &Value) -> Result<T, ToolError> {
    let arguments = match arguments {
        Value::Null => json!({}),
        other => other.clone(),
    };
    serde_json::from_value(arguments).map_err(|error| ToolError::invalid(tool, error.to_string()))
}

fn describe(name: &str) -> (&'static str, Value) {
    match name {
        READ_FILE => (
            "Read a UTF-8 text file in the workspace. With start_line/end_line the selected lines are returned with line numbers.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path, relative to the workspace root."},
                    "start_line": {"type": "integer", "minimum": 1, "description": "First line to return (1-based)."},
                    "end_line": {"type": "integer", "minimum": 1, "description": "Last line to return (1-based, inclusive)."}
                },
                "required": ["path"],
                "additionalProperties": false
            }),
        ),
        LIST_DIR => (
            "List a directory in the workspace. Directories end with '/'. Symlinked directories are not followed.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory to list (default '.')."},
                    "depth": {"type": "integer", "minimum": 1, "maximum": fs::MAX_LIST_DEPTH, "description": "How many levels to descend (default 1)."}
                },
                "additionalProperties": false
            }),
        ),
        GREP_FILES => (
            "Search workspace files for a regular expression. Returns path:line: text for each matching line.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Regular expression to search for."},
                    "path": {"type": "string", "description": "File or directory to search (default '.')."},
                    "include": {"type": "string", "description": "Glob that file paths must match, e.g. '*.rs'."}
                },
                "required": ["pattern"],
                "additionalProperties": false
            }),
        ),
        APPLY_PATCH => (
            "Apply a patch in the '*** Begin Patch' format. Each file is applied atomically; the result lists applied and rejected files.",
            json!({
                "type": "object",
                "properties": {
                    "patch": {"type": "string", "description": "Full patch text from '*** Begin Patch' to '*** End Patch'."}
                },
                "required": ["patch"],
                "additionalProperties": false
            }),
        ),
        EXEC_COMMAND => (
            "Start a bash command in an interactive session and return the output produced within yield_time_ms. A command still running keeps a session id for write_stdin.",
            json!({
                "type": "object",
                "properties": {
                    "cmd": {"type": "string", "description": "Command line passed to `bash -c`."},
                    "workdir": {"type": "string", "description": "Working directory, relative to the workspace root."},
                    "yield_time_ms": {"type": "integer", "minimum": 0, "description": "How long to wait for output before returning."}
                },
                "required": ["cmd"],
                "additionalProperties": false
            }),
        ),
        WRITE_STDIN => (
            "Send characters to a running exec_command session and return the output it produced since the last call.",
            json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "integer", "minimum": 1},
                    "chars": {"type": "string", "description": "Characters to write; include \\n to submit a line. Empty just polls for output."},
                    "yield_time_ms": {"type": "integer", "minimum": 0, "description": "How long to wait for output before returning."}
                },
                "required": ["session_id"],
                "additionalProperties": false
            }),
        ),
        _ => (
            "Run a shell command with bash in the workspace and return its exit status, stdout and stderr.",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Command line passed to `bash -c`."},
                    "timeout_sec": {"type": "integer", "minimum": 1, "description": "Seconds before the command is killed."},
                    "workdir": {"type": "string", "description": "Working directory, relative to the workspace root."}
                },
                "required": ["command"],
                "additionalProperties": false
            }),
        ),
    }
}

/// Cuts `content` to at most `max_bytes` on a char boundary. Returns whether
/// anything was removed.
pub(crate) fn truncate_to_byte_limit(content: &mut String, max_bytes: usize) -> bool {
    if content.len() <= max_bytes {
        return false;
    }

    let mut cutoff = max_bytes;
    while cutoff > 0 && !content.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    content.truncate(cutoff);
    true
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn descriptors_cover_every_native_tool_with_object_schemas() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tools = NativeTools::new(dir.path(), ToolLimits::default()).expect("tools");

        let names: Vec<String> = tools.descriptors().into_iter().map(|descriptor| descriptor.name).collect();
        assert_eq!(names, NATIVE_TOOL_NAMES.map(str::to_string).to_vec());
        for descriptor in tools.descriptors() {
            assert_eq!(descriptor.input_schema["type"], "object", "{}", descriptor.name);
        }
    }

    #[test]
    fn unknown_fields_and_wrong_types_are_invalid_arguments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tools = NativeTools::new(dir.path(), ToolLimits::default()).expect("tools");
        let cancel = agent_provider::new_cancel_signal();

        let error = tools
            .execute(READ_FILE, &json!({"path": 3}), &cancel)
            .unwrap_err();
        assert!(matches!(error, ToolError::InvalidArguments { tool: READ_FILE, .. }), "{error}");

        let error = tools
            .execute(LIST_DIR, &json!({"recursive": true}), &cancel)
            .unwrap_err();
        assert!(matches!(error, ToolError::InvalidArguments { tool: LIST_DIR, .. }), "{error}");

        assert_eq!(
            tools.execute("write_file", &json!({}), &cancel).unwrap_err(),
            ToolError::UnknownTool("write_file".to_string())
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut text = "héllo".to_string();
        assert!(truncate_to_byte_limit(&mut text, 2));
        assert_eq!(text, "h");

        let mut short = "ok".to_string();
        assert!(!truncate_to_byte_limit(&mut short, 10));
        assert_eq!(short, "ok");
    }

    #[test]
    fn limits_deserialize_with_defaults() {
        let limits: ToolLimits = serde_json::from_value(json!({"grep_max_matches": 5})).expect("limits");
        assert_eq!(limits.grep_max_matches, 5);
        assert_eq!(limits.shell_timeout_sec, ToolLimits::default().shell_timeout_sec);
        assert!(serde_json::from_value::<ToolLimits>(json!({"bogus": 1})).is_err());
    }
}
