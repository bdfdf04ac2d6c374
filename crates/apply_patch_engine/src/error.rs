use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Patch text that does not follow the patch grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid patch: {message} (line {line})")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Why one file operation was rejected. A rejected file is left untouched.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("Cannot add {}: file already exists", path.display())]
    AlreadyExists { path: PathBuf },
    #[error("Failed to read file to update {}: {source}", path.display())]
    Unreadable { path: PathBuf, source: io::Error },
    #[error("Failed to delete file {}: {source}", path.display())]
    DeleteFailed { path: PathBuf, source: io::Error },
    #[error("Failed to find expected lines in {} (hunk {hunk}):\n{expected}", path.display())]
    ContextNotFound {
        path: PathBuf,
        hunk: usize,
        expected: String,
    },
    #[error("ambiguous match in {} (hunk {hunk}): context matches {matches} locations", path.display())]
    Ambiguous { path: PathBuf, hunk: usize, matches: usize },
    #[error("Failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },
    #[error("{} was not modified: patch application was cancelled", path.display())]
    Cancelled { path: PathBuf },
}

impl FileError {
    /// True when a hunk could not be placed: its context was missing or not
    /// unique.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ContextNotFound { .. } | Self::Ambiguous { .. })
    }

    #[must_use]
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::AlreadyExists { path }
            | Self::Unreadable { path, .. }
            | Self::DeleteFailed { path, .. }
            | Self::ContextNotFound { path, .. }
            | Self::Ambiguous { path, .. }
            | Self::WriteFailed { path, .. }
            | Self::Cancelled { path } => path,
        }
    }
}

/// Failure of a whole `apply_patch` invocation.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{failed} of {total} file operations failed; first failure: {first}")]
    Incomplete { failed: usize, total: usize, first: String },
    #[error("failed to write patch summary: {0}")]
    Output(#[from] io::Error),
}
