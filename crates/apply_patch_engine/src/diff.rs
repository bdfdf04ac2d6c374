use std::fmt::Write as _;

use similar::{ChangeTag, TextDiff};

use crate::parser::{
    Hunk, HunkLine, PatchOp, ADD_FILE, BEGIN_PATCH, DELETE_FILE, END_OF_FILE, END_PATCH, HUNK_MARKER, MOVE_TO,
    UPDATE_FILE,
};

const CONTEXT_LINES: usize = 3;

/// Context-addressed hunks that turn `old` into `new`. Empty when the two
/// texts have the same lines.
#[must_use]
pub fn derive_update(old: &str, new: &str) -> Vec<Hunk> {
    let diff = TextDiff::from_lines(old, new);
    let old_len = diff.old_slices().len();

    diff.grouped_ops(CONTEXT_LINES)
        .into_iter()
        .map(|group| {
            let end_of_file = group.last().is_some_and(|op| op.old_range().end == old_len);
            let lines = group
                .iter()
                .flat_map(|op| diff.iter_changes(op))
                .map(|change| {
                    let text = trim_newline(change.value()).to_string();
                    match change.tag() {
                        ChangeTag::Equal => HunkLine::Context(text),
                        ChangeTag::Delete => HunkLine::Remove(text),
                        ChangeTag::Insert => HunkLine::Add(text),
                    }
                })
                .collect();
            Hunk {
                anchor: None,
                lines,
                end_of_file,
            }
        })
        .collect()
}

fn trim_newline(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Renders operations in the patch text format accepted by `parse_patch`.
#[must_use]
pub fn render_patch(ops: &[PatchOp]) -> String {
    let mut text = format!("{BEGIN_PATCH}\n");
    for op in ops {
        match op {
            PatchOp::AddFile { path, content } => {
                let _ = writeln!(text, "{ADD_FILE}{}", path.display());
                for line in content.lines() {
                    let _ = writeln!(text, "+{line}");
                }
            }
            PatchOp::DeleteFile { path } => {
                let _ = writeln!(text, "{DELETE_FILE}{}", path.display());
            }
            PatchOp::UpdateFile { path, move_to, hunks } => {
                let _ = writeln!(text, "{UPDATE_FILE}{}", path.display());
                if let Some(destination) = move_to {
                    let _ = writeln!(text, "{MOVE_TO}{}", destination.display());
                }
                for hunk in hunks {
                    match &hunk.anchor {
                        Some(anchor) => {
                            let _ = writeln!(text, "{HUNK_MARKER} {anchor}");
                        }
                        None => {
                            let _ = writeln!(text, "{HUNK_MARKER}");
                        }
                    }
                    for line in &hunk.lines {
                        let (prefix, body) = match line {
                            HunkLine::Context(body) => (' ', body),
                            HunkLine::Remove(body) => ('-', body),
                            HunkLine::Add(body) => ('+', body),
                        };
                        let _ = writeln!(text, "{prefix}{body}");
                    }
                    if hunk.end_of_file {
                        let _ = writeln!(text, "{END_OF_FILE}");
                    }
                }
            }
        }
    }
    text.push_str(END_PATCH);
    text.push('\n');
    text
}
