//! Parser and applier for the `*** Begin Patch` text-diff format.
//!
//! Hunks are located by their context lines. A file whose hunks cannot all
//! be placed at exactly one location is left byte-for-byte untouched, while
//! the other files in the same patch are still applied.

use std::io::Write;
use std::path::Path;

mod apply;
mod diff;
mod error;
mod parser;
mod seek;

pub use apply::{apply, apply_until, FileChange, FileOutcome, PatchReport};
pub use diff::{derive_update, render_patch};
pub use error::{FileError, ParseError, PatchError};
pub use parser::{parse_patch, Hunk, HunkLine, Patch, PatchOp};

/// Parses `patch` and applies it under `root`.
pub fn apply_patch_in(patch: &str, root: &Path) -> Result<PatchReport, ParseError> {
    let parsed = parse_patch(patch)?;
    Ok(apply(&parsed, root))
}

/// Applies `patch` relative to the current directory, writing the list of
/// changed files to `stdout` and one line per rejected file to `stderr`.
///
/// Returns an error when the patch does not parse or any file was rejected.
pub fn apply_patch(patch: &str, stdout: &mut impl Write, stderr: &mut impl Write) -> Result<PatchReport, PatchError> {
    let parsed = match parse_patch(patch) {
        Ok(parsed) => parsed,
        Err(error) => {
            writeln!(stderr, "{error}")?;
            return Err(error.into());
        }
    };
    let report = apply(&parsed, Path::new("."));

    let changed = report.changed_files();
    if report.is_success() {
        write!(stdout, "Success. Updated the following files:\n{changed}")?;
        return Ok(report);
    }

    if !changed.is_empty() {
        write!(stdout, "Partially applied. Updated the following files:\n{changed}")?;
    }
    let mut failed = 0;
    let mut first = None;
    for failure in report.failures() {
        writeln!(stderr, "{failure}")?;
        failed += 1;
        first.get_or_insert_with(|| failure.to_string());
    }
    Err(PatchError::Incomplete {
        failed,
        total: report.outcomes.len(),
        first: first.unwrap_or_default(),
    })
}
