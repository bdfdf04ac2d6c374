use std::path::PathBuf;

use thiserror::Error;

/// Failure reading, validating or extending a transcript file. Variants about
/// file content carry the 1-based line they were found on.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("{operation} {path} failed: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: read failed: {source}")]
    IoLine {
        path: PathBuf,
        line: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: invalid record: {source}")]
    JsonLineParse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path}:{line}: record type {found} is neither `session` nor `entry`")]
    UnknownRecordType { path: PathBuf, line: usize, found: String },

    #[error("{path} is empty; a transcript starts with a session header")]
    MissingHeader { path: PathBuf },

    #[error("{path}:{line}: expected the session header")]
    InvalidHeaderRecord { path: PathBuf, line: usize },

    #[error("{path}:{line}: transcript version {found} is not supported (this build reads {expected})")]
    UnsupportedVersion {
        path: PathBuf,
        line: usize,
        found: u32,
        expected: u32,
    },

    #[error("{path}:{line}: entry id '{id}' is already used")]
    DuplicateEntryId { path: PathBuf, line: usize, id: String },

    #[error("{path}:{line}: entry '{entry_id}' points at unknown parent '{parent_id}'")]
    DanglingParentId {
        path: PathBuf,
        line: usize,
        entry_id: String,
        parent_id: String,
    },

    #[error("{path}:{line}: a second session header appears after entries")]
    InvalidEntryRecord { path: PathBuf, line: usize },

    #[error("{path}:{line}: `{field}` is not an RFC 3339 timestamp: {value}")]
    InvalidTimestamp {
        path: PathBuf,
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("{path}:{line}: session cwd must be absolute, got {cwd}")]
    NonAbsoluteCwd { path: PathBuf, line: usize, cwd: String },

    #[error("no transcripts to resume under {root}")]
    NoSessionsFound { root: PathBuf },

    #[error("no transcript under {root} has session id '{id}'")]
    SessionNotFound { root: PathBuf, id: String },

    #[error("session id prefix '{id}' matches {count} transcripts")]
    AmbiguousSessionId { id: String, count: usize },

    #[error("{path} has no entry '{leaf_id}' to replay from")]
    UnknownLeafId { path: PathBuf, leaf_id: String },

    #[error("{path}: parent links starting at '{leaf_id}' form a cycle")]
    ReplayCycle { path: PathBuf, leaf_id: String },

    #[error("encoding a record for {path} failed: {source}")]
    JsonSerialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("formatting the current time failed: {0}")]
    ClockFormat(#[source] time::error::Format),
}

impl SessionStoreError {
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn io_line(path: impl Into<PathBuf>, line: usize, source: std::io::Error) -> Self {
        Self::IoLine {
            path: path.into(),
            line,
            source,
        }
    }

    pub(crate) fn json_line(path: impl Into<PathBuf>, line: usize, source: serde_json::Error) -> Self {
        Self::JsonLineParse {
            path: path.into(),
            line,
            source,
        }
    }
}
