use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::FileError;
use crate::parser::{Hunk, Patch, PatchOp};
use crate::seek::apply_hunks;

/// What a successful file operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    Added,
    Modified,
    Deleted,
}

impl FileChange {
    #[must_use]
    pub fn letter(self) -> char {
        match self {
            Self::Added => 'A',
            Self::Modified => 'M',
            Self::Deleted => 'D',
        }
    }
}

/// Result of one file operation. `path` is the path as written in the patch
/// (the destination for moves).
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: Result<FileChange, FileError>,
}

/// Per-file results in patch order.
#[derive(Debug, Default)]
pub struct PatchReport {
    pub outcomes: Vec<FileOutcome>,
}

impl PatchReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileError> {
        self.outcomes.iter().filter_map(|outcome| outcome.result.as_ref().err())
    }

    pub fn applied(&self) -> impl Iterator<Item = (&Path, FileChange)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok().map(|change| (outcome.path.as_path(), *change)))
    }

    /// `A`/`M`/`D` lines, grouped in that order.
    #[must_use]
    pub fn changed_files(&self) -> String {
        let mut text = String::new();
        for wanted in [FileChange::Added, FileChange::Modified, FileChange::Deleted] {
            for (path, change) in self.applied().filter(|(_, change)| *change == wanted) {
                text.push_str(&format!("{} {}\n", change.letter(), path.display()));
            }
        }
        text
    }

    /// Human-readable report of applied and rejected files.
    #[must_use]
    pub fn summary(&self) -> String {
        let changed = self.changed_files();
        let mut text = if self.is_success() {
            format!("Success. Updated the following files:\n{changed}")
        } else if changed.is_empty() {
            "No files were modified.\n".to_string()
        } else {
            format!("Partially applied. Updated the following files:\n{changed}")
        };
        if !self.is_success() {
            text.push_str("Failed to apply the following files:\n");
            for failure in self.failures() {
                text.push_str(&format!("{failure}\n"));
            }
        }
        text
    }
}

/// Applies `patch` with paths resolved against `root`.
#[must_use]
pub fn apply(patch: &Patch, root: &Path) -> PatchReport {
    apply_until(patch, root, &|| false)
}

/// Like [`apply`], but checks `should_stop` before each file. Files not yet
/// started when it returns true are reported as cancelled and left
/// untouched; a file that has started is always finished.
pub fn apply_until(patch: &Patch, root: &Path, should_stop: &dyn Fn() -> bool) -> PatchReport {
    let mut report = PatchReport::default();
    let mut stopped = false;
    for op in &patch.ops {
        stopped = stopped || should_stop();
        let outcome = if stopped {
            FileOutcome {
                path: op.path().clone(),
                result: Err(FileError::Cancelled { path: op.path().clone() }),
            }
        } else {
            apply_op(op, root)
        };
        match &outcome.result {
            Ok(change) => tracing::debug!(path = %outcome.path.display(), change = %change.letter(), "patch file applied"),
            Err(error) => tracing::warn!(path = %outcome.path.display(), %error, "patch file rejected"),
        }
        report.outcomes.push(outcome);
    }
    report
}

fn apply_op(op: &PatchOp, root: &Path) -> FileOutcome {
    match op {
        PatchOp::AddFile { path, content } => FileOutcome {
            path: path.clone(),
            result: add_file(path, &root.join(path), content),
        },
        PatchOp::DeleteFile { path } => FileOutcome {
            path: path.clone(),
            result: delete_file(path, &root.join(path)),
        },
        PatchOp::UpdateFile { path, move_to, hunks } => FileOutcome {
            path: move_to.clone().unwrap_or_else(|| path.clone()),
            result: update_file(root, path, move_to.as_deref(), hunks),
        },
    }
}

fn add_file(path: &Path, target: &Path, content: &str) -> Result<FileChange, FileError> {
    if fs::symlink_metadata(target).is_ok() {
        return Err(FileError::AlreadyExists { path: path.to_path_buf() });
    }
    write_atomic(target, content).map_err(|source| FileError::WriteFailed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(FileChange::Added)
}

fn delete_file(path: &Path, target: &Path) -> Result<FileChange, FileError> {
    fs::remove_file(target).map_err(|source| FileError::DeleteFailed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(FileChange::Deleted)
}

fn update_file(root: &Path, path: &Path, move_to: Option<&Path>, hunks: &[Hunk]) -> Result<FileChange, FileError> {
    let source = root.join(path);
    let content = fs::read_to_string(&source).map_err(|error| FileError::Unreadable {
        path: path.to_path_buf(),
        source: error,
    })?;
    let updated = apply_hunks(path, &content, hunks)?;

    let Some(destination_path) = move_to else {
        write_atomic(&source, &updated).map_err(|error| FileError::WriteFailed {
            path: path.to_path_buf(),
            source: error,
        })?;
        return Ok(FileChange::Modified);
    };

    let destination = root.join(destination_path);
    let staged = stage(&destination, &updated, &source).map_err(|error| FileError::WriteFailed {
        path: destination_path.to_path_buf(),
        source: error,
    })?;
    if same_file(&source, &destination) {
        staged.persist(&destination).map_err(|error| FileError::WriteFailed {
            path: destination_path.to_path_buf(),
            source: error.error,
        })?;
        return Ok(FileChange::Modified);
    }
    relocate(
        Move {
            path,
            destination_path,
            source: &source,
            destination: &destination,
            original: &content,
        },
        staged,
        |source| fs::remove_file(source),
    )?;
    Ok(FileChange::Modified)
}

struct Move<'a> {
    path: &'a Path,
    destination_path: &'a Path,
    source: &'a Path,
    destination: &'a Path,
    original: &'a str,
}

/// Removes the source before the staged destination is renamed into place,
/// so a failed removal leaves both paths as they were. If the rename then
/// fails, the source is written back.
fn relocate(
    step: Move<'_>,
    staged: NamedTempFile,
    remove_source: impl FnOnce(&Path) -> io::Result<()>,
) -> Result<(), FileError> {
    remove_source(step.source).map_err(|error| FileError::DeleteFailed {
        path: step.path.to_path_buf(),
        source: error,
    })?;
    if let Err(error) = staged.persist(step.destination) {
        if let Err(restore) = write_atomic(step.source, step.original) {
            tracing::error!(path = %step.path.display(), error = %restore, "failed to restore moved file");
        }
        return Err(FileError::WriteFailed {
            path: step.destination_path.to_path_buf(),
            source: error.error,
        });
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Writes through a temporary file in the target directory and renames it
/// into place. Existing permissions are carried over.
pub(crate) fn write_atomic(target: &Path, content: &str) -> io::Result<()> {
    stage(target, content, target)?
        .persist(target)
        .map_err(|error| error.error)?;
    Ok(())
}

/// Temporary file next to `target` holding `content`, with the permissions
/// of `permissions_from` when that exists. Dropping it discards the write.
fn stage(target: &Path, content: &str, permissions_from: &Path) -> io::Result<NamedTempFile> {
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(content.as_bytes())?;
    if let Ok(metadata) = fs::metadata(permissions_from) {
        fs::set_permissions(temp.path(), metadata.permissions())?;
    }
    temp.as_file().sync_all()?;
    Ok(temp)
}
