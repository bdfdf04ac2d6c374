use std::path::PathBuf;

use agent_provider::{is_cancelled, CancelSignal};
use apply_patch_engine::{apply_until, parse_patch, FileError, PatchOp};
use serde::Deserialize;

use super::{Sandbox, ToolError, ToolOutput, APPLY_PATCH};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ApplyPatchArgs {
    #[serde(alias = "input")]
    patch: String,
}

/// Rewrites every path in the patch to its sandbox-resolved form, then applies
/// it file by file. A sandbox violation anywhere rejects the whole patch
/// before any file is touched.
pub(crate) fn apply_patch(sandbox: &Sandbox, args: ApplyPatchArgs, cancel: &CancelSignal) -> Result<ToolOutput, ToolError> {
    if args.patch.trim().is_empty() {
        return Err(ToolError::InvalidArguments {
            tool: APPLY_PATCH,
            message: "patch must not be empty".to_string(),
        });
    }
    let mut patch = parse_patch(&args.patch).map_err(|error| ToolError::InvalidArguments {
        tool: APPLY_PATCH,
        message: error.to_string(),
    })?;

    for op in &mut patch.ops {
        match op {
            PatchOp::AddFile { path, .. } | PatchOp::DeleteFile { path } => confine(sandbox, path)?,
            PatchOp::UpdateFile { path, move_to, .. } => {
                confine(sandbox, path)?;
                if let Some(target) = move_to {
                    confine(sandbox, target)?;
                }
            }
        }
    }

    let report = apply_until(&patch, sandbox.root(), &|| is_cancelled(cancel));
    let applied = report.applied().count();
    let total = report.outcomes.len();
    let content = report.summary();

    if report.is_success() {
        let plural = if total == 1 { "file" } else { "files" };
        return Ok(ToolOutput::new(content, format!("apply_patch: {total} {plural} updated")));
    }

    let failures: Vec<&FileError> = report.failures().collect();
    if failures.iter().all(|failure| matches!(failure, FileError::Cancelled { .. })) && applied == 0 {
        return Err(ToolError::Cancelled);
    }
    if failures.iter().any(|failure| failure.is_conflict()) {
        Err(ToolError::PatchConflict(content))
    } else {
        Err(ToolError::PatchFailed(content))
    }
}

/// Replaces `path` with the root-relative location the sandbox resolved, so
/// the engine never re-interprets `..` or symlinks on its own.
fn confine(sandbox: &Sandbox, path: &mut PathBuf) -> Result<(), ToolError> {
    *path = sandbox.relative_for_write(&path.to_string_lossy())?;
    Ok(())
}
