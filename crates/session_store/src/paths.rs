use std::path::{Path, PathBuf};

/// Transcript directory relative to the workspace root.
pub const SESSIONS_SUBDIR: &str = ".agent/sessions";

#[must_use]
pub fn session_root(cwd: &Path) -> PathBuf {
    SESSIONS_SUBDIR.split('/').fold(cwd.to_path_buf(), |path, part| path.join(part))
}

/// `<timestamp>_<session id>.jsonl`, with characters that are awkward in file
/// names replaced so the name still sorts by creation time.
#[must_use]
pub fn session_file_name(created_at: &str, session_id: &str) -> String {
    let stamp: String = created_at
        .chars()
        .map(|c| if matches!(c, ':' | '/' | '\\' | ' ') { '-' } else { c })
        .collect();
    format!("{stamp}_{session_id}.jsonl")
}
