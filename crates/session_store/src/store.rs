use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use agent_provider::Turn;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::SessionStoreError;
use crate::listing::transcript_files;
use crate::paths::{session_file_name, session_root};
use crate::schema::{JsonLine, SessionEntry, SessionEntryKind, SessionHeader, SESSION_VERSION};

/// Append-only JSONL transcript: one header line, then one line per entry.
///
/// Entries link to their parent, so a file can hold several branches; the
/// current leaf is always the most recently appended entry.
#[derive(Debug)]
pub struct SessionStore {
    pub(crate) path: PathBuf,
    file: File,
    pub(crate) header: SessionHeader,
    pub(crate) entries: Vec<SessionEntry>,
    pub(crate) index_by_id: HashMap<String, usize>,
    pub(crate) current_leaf_id: Option<String>,
}

impl SessionStore {
    /// Starts a new transcript under `<cwd>/.agent/sessions/`.
    pub fn create_new(cwd: &Path) -> Result<Self, SessionStoreError> {
        Self::create_with_provider(cwd, None)
    }

    pub fn create_with_provider(cwd: &Path, provider_id: Option<&str>) -> Result<Self, SessionStoreError> {
        let cwd = if cwd.is_absolute() {
            cwd.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|source| SessionStoreError::io("resolving current directory", cwd, source))?
                .join(cwd)
        };
        let created_at = now_rfc3339()?;
        let session_id = uuid::Uuid::new_v4().to_string();

        let root = session_root(&cwd);
        std::fs::create_dir_all(&root)
            .map_err(|source| SessionStoreError::io("creating session directory", &root, source))?;
        let path = root.join(session_file_name(&created_at, &session_id));

        let mut header = SessionHeader::v1(session_id, created_at, cwd.display().to_string());
        header.provider_id = provider_id.map(str::to_string);

        let mut file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|source| SessionStoreError::io("creating session file", &path, source))?;
        let line = serialize_line(&path, &header)?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|source| SessionStoreError::io("writing session header", &path, source))?;
        tracing::debug!(path = %path.display(), session_id = %header.session_id, "created session transcript");

        Ok(Self {
            path,
            file,
            header,
            entries: Vec::new(),
            index_by_id: HashMap::new(),
            current_leaf_id: None,
        })
    }

    /// Opens and validates an existing transcript for reading and appending.
    pub fn open(path: &Path) -> Result<Self, SessionStoreError> {
        let path = path.to_path_buf();
        let read_file =
            File::open(&path).map_err(|source| SessionStoreError::io("opening session file", &path, source))?;
        let reader = BufReader::new(read_file);

        let mut header: Option<SessionHeader> = None;
        let mut entries_with_lines: Vec<(usize, SessionEntry)> = Vec::new();
        let mut index_by_id = HashMap::new();

        for (line_index, line_result) in reader.lines().enumerate() {
            let line_number = line_index + 1;
            let line = line_result.map_err(|source| SessionStoreError::io_line(&path, line_number, source))?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed = parse_json_line(&path, line_number, &line)?;

            match (parsed, header.is_some()) {
                (JsonLine::Session(parsed_header), false) => {
                    validate_header_line(&path, line_number, &parsed_header)?;
                    header = Some(parsed_header);
                }
                (JsonLine::Entry(_), false) => {
                    return Err(SessionStoreError::InvalidHeaderRecord {
                        path,
                        line: line_number,
                    });
                }
                (JsonLine::Session(_), true) => {
                    return Err(SessionStoreError::InvalidEntryRecord {
                        path,
                        line: line_number,
                    });
                }
                (JsonLine::Entry(entry), true) => {
                    validate_rfc3339(&path, line_number, "ts", &entry.ts)?;
                    if index_by_id.contains_key(&entry.id) {
                        return Err(SessionStoreError::DuplicateEntryId {
                            path,
                            line: line_number,
                            id: entry.id,
                        });
                    }
                    index_by_id.insert(entry.id.clone(), entries_with_lines.len());
                    entries_with_lines.push((line_number, entry));
                }
            }
        }

        let header = header.ok_or_else(|| SessionStoreError::MissingHeader { path: path.clone() })?;
        for (line_number, entry) in &entries_with_lines {
            check_parent(&path, *line_number, entry, &index_by_id)?;
        }

        let entries: Vec<SessionEntry> = entries_with_lines.into_iter().map(|(_, entry)| entry).collect();
        let current_leaf_id = entries.last().map(|entry| entry.id.clone());

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|source| SessionStoreError::io("opening session file for append", &path, source))?;
        tracing::debug!(path = %path.display(), entries = entries.len(), "opened session transcript");

        Ok(Self {
            path,
            file,
            header,
            entries,
            index_by_id,
            current_leaf_id,
        })
    }

    /// Newest transcript under `<cwd>/.agent/sessions/`, ordered by the
    /// creation timestamp embedded in the file name.
    pub fn latest_session_path(cwd: &Path) -> Result<PathBuf, SessionStoreError> {
        let root = session_root(cwd);
        let mut newest: Option<(String, std::time::SystemTime, PathBuf)> = None;
        for path in transcript_files(&root)? {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let stamp = name.split('_').next().unwrap_or_default().to_string();
            let modified = std::fs::metadata(&path)
                .and_then(|metadata| metadata.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            let candidate = (stamp, modified, path);
            if newest
                .as_ref()
                .map_or(true, |current| (&candidate.0, candidate.1) > (&current.0, current.1))
            {
                newest = Some(candidate);
            }
        }
        newest
            .map(|(_, _, path)| path)
            .ok_or(SessionStoreError::NoSessionsFound { root })
    }

    /// Validates and durably appends `entry`; it becomes the current leaf.
    /// Nothing changes when validation or the write fails.
    pub fn append(&mut self, entry: SessionEntry) -> Result<(), SessionStoreError> {
        let line_number = self.entries.len() + 2;
        validate_rfc3339(&self.path, line_number, "ts", &entry.ts)?;
        if self.index_by_id.contains_key(&entry.id) {
            return Err(SessionStoreError::DuplicateEntryId {
                path: self.path.clone(),
                line: line_number,
                id: entry.id,
            });
        }
        check_parent(&self.path, line_number, &entry, &self.index_by_id)?;

        let line = serialize_line(&self.path, &entry)?;
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|source| SessionStoreError::io("appending session entry", &self.path, source))?;

        self.index_by_id.insert(entry.id.clone(), self.entries.len());
        self.current_leaf_id = Some(entry.id.clone());
        self.entries.push(entry);
        Ok(())
    }

    /// Appends `turn` as a child of the current leaf with a fresh id and the
    /// current time. Returns the new entry id.
    pub fn append_turn(&mut self, turn: &Turn) -> Result<String, SessionStoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let entry = SessionEntry::new(
            id.clone(),
            self.current_leaf_id.clone(),
            now_rfc3339()?,
            SessionEntryKind::from(turn.clone()),
        );
        self.append(entry)?;
        Ok(id)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn header(&self) -> &SessionHeader {
        &self.header
    }

    #[must_use]
    pub fn entries(&self) -> &[SessionEntry] {
        &self.entries
    }

    #[must_use]
    pub fn current_leaf_id(&self) -> Option<&str> {
        self.current_leaf_id.as_deref()
    }
}

fn now_rfc3339() -> Result<String, SessionStoreError> {
    let now = OffsetDateTime::now_utc();
    let now = now.replace_nanosecond(0).unwrap_or(now);
    now.format(&Rfc3339).map_err(SessionStoreError::ClockFormat)
}

fn serialize_line(path: &Path, record: &impl serde::Serialize) -> Result<String, SessionStoreError> {
    let mut line = serde_json::to_string(record).map_err(|source| SessionStoreError::JsonSerialize {
        path: path.to_path_buf(),
        source,
    })?;
    line.push('\n');
    Ok(line)
}

pub(crate) fn parse_json_line(path: &Path, line_number: usize, line: &str) -> Result<JsonLine, SessionStoreError> {
    let parse_error = |source: serde_json::Error| SessionStoreError::json_line(path, line_number, source);
    let value: Value = serde_json::from_str(line).map_err(parse_error)?;
    match value.get("type").and_then(Value::as_str) {
        Some("session") => Ok(JsonLine::Session(serde_json::from_value(value).map_err(parse_error)?)),
        Some("entry") => Ok(JsonLine::Entry(serde_json::from_value(value).map_err(parse_error)?)),
        _ => Err(SessionStoreError::UnknownRecordType {
            path: path.to_path_buf(),
            line: line_number,
            found: value.get("type").map_or_else(|| "(missing)".to_string(), Value::to_string),
        }),
    }
}

fn validate_header_line(path: &Path, line_number: usize, header: &SessionHeader) -> Result<(), SessionStoreError> {
    if header.version != SESSION_VERSION {
        return Err(SessionStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            line: line_number,
            found: header.version,
            expected: SESSION_VERSION,
        });
    }

    validate_rfc3339(path, line_number, "created_at", &header.created_at)?;

    if !Path::new(&header.cwd).is_absolute() {
        return Err(SessionStoreError::NonAbsoluteCwd {
            path: path.to_path_buf(),
            line: line_number,
            cwd: header.cwd.clone(),
        });
    }

    Ok(())
}

fn check_parent(
    path: &Path,
    line_number: usize,
    entry: &SessionEntry,
    index_by_id: &HashMap<String, usize>,
) -> Result<(), SessionStoreError> {
    match &entry.parent_id {
        Some(parent_id) if !index_by_id.contains_key(parent_id) => Err(SessionStoreError::DanglingParentId {
            path: path.to_path_buf(),
            line: line_number,
            entry_id: entry.id.clone(),
            parent_id: parent_id.clone(),
        }),
        _ => Ok(()),
    }
}

fn validate_rfc3339(path: &Path, line_number: usize, field: &'static str, value: &str) -> Result<(), SessionStoreError> {
    if OffsetDateTime::parse(value, &Rfc3339).is_err() {
        return Err(SessionStoreError::InvalidTimestamp {
            path: path.to_path_buf(),
            line: line_number,
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}
