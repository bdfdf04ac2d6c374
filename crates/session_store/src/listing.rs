use std::path::{Path, PathBuf};

use crate::error::SessionStoreError;
use crate::paths::session_root;
use crate::schema::SessionEntryKind;
use crate::store::SessionStore;

const TITLE_CHARS: usize = 60;

/// One resumable transcript, as shown by `/resume`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub path: PathBuf,
    pub created_at: String,
    pub provider_id: Option<String>,
    /// First user message, shortened to one line.
    pub title: String,
    pub entry_count: usize,
}

impl SessionSummary {
    fn from_store(store: &SessionStore) -> Self {
        let title = store
            .entries()
            .iter()
            .find_map(|entry| match &entry.kind {
                SessionEntryKind::UserText { text } if !text.trim().is_empty() => Some(derive_title(text)),
                _ => None,
            })
            .unwrap_or_else(|| "(no messages)".to_string());
        let header = store.header();
        Self {
            session_id: header.session_id.clone(),
            path: store.path().to_path_buf(),
            created_at: header.created_at.clone(),
            provider_id: header.provider_id.clone(),
            title,
            entry_count: store.entries().len(),
        }
    }
}

impl SessionStore {
    /// Every readable transcript under `<cwd>/.agent/sessions/`, newest first.
    /// Files that fail validation are skipped.
    pub fn list_sessions(cwd: &Path) -> Result<Vec<SessionSummary>, SessionStoreError> {
        let root = session_root(cwd);
        let mut summaries = Vec::new();
        for path in transcript_files(&root)? {
            match SessionStore::open(&path) {
                Ok(store) => summaries.push(SessionSummary::from_store(&store)),
                Err(error) => tracing::warn!(path = %path.display(), %error, "skipping unreadable transcript"),
            }
        }
        summaries.sort_by(|a, b| (&b.created_at, &b.path).cmp(&(&a.created_at, &a.path)));
        Ok(summaries)
    }

    /// Transcript whose session id equals or starts with `id`.
    pub fn find_session(cwd: &Path, id: &str) -> Result<SessionSummary, SessionStoreError> {
        let id = id.trim();
        let mut matches: Vec<SessionSummary> = Self::list_sessions(cwd)?
            .into_iter()
            .filter(|summary| !id.is_empty() && summary.session_id.starts_with(id))
            .collect();
        if let Some(exact) = matches.iter().position(|summary| summary.session_id == id) {
            return Ok(matches.swap_remove(exact));
        }
        match matches.len() {
            0 => Err(SessionStoreError::SessionNotFound {
                root: session_root(cwd),
                id: id.to_string(),
            }),
            1 => Ok(matches.remove(0)),
            count => Err(SessionStoreError::AmbiguousSessionId {
                id: id.to_string(),
                count,
            }),
        }
    }
}

pub(crate) fn transcript_files(root: &Path) -> Result<Vec<PathBuf>, SessionStoreError> {
    let listing = match std::fs::read_dir(root) {
        Ok(listing) => listing,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(SessionStoreError::io("listing session directory", root, source)),
    };
    let mut files = Vec::new();
    for item in listing {
        let item = item.map_err(|source| SessionStoreError::io("listing session directory", root, source))?;
        let path = item.path();
        if path.extension().and_then(|extension| extension.to_str()) == Some("jsonl") {
            files.push(path);
        }
    }
    Ok(files)
}

fn derive_title(text: &str) -> String {
    let line = text.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or_default();
    if line.chars().count() <= TITLE_CHARS {
        return line.to_string();
    }
    let mut title: String = line.chars().take(TITLE_CHARS - 1).collect();
    title.push('…');
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_use_the_first_non_blank_line() {
        assert_eq!(derive_title("\n  fix the build  \nthen tests"), "fix the build");
        let long = "x".repeat(80);
        let title = derive_title(&long);
        assert_eq!(title.chars().count(), TITLE_CHARS);
        assert!(title.ends_with('…'));
    }
}
