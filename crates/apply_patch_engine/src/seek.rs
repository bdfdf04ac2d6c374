use std::path::Path;

use crate::error::FileError;
use crate::parser::Hunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Seek {
    Found(usize),
    NotFound,
    Ambiguous(usize),
}

type LineEq = fn(&str, &str) -> bool;

/// Comparison passes, strictest first. The first pass with any match decides
/// the outcome, so a unique exact match is never reported as ambiguous
/// because of looser whitespace matches.
const PASSES: [LineEq; 3] = [
    |a, b| a == b,
    |a, b| a.trim_end() == b.trim_end(),
    |a, b| a.trim() == b.trim(),
];

/// Locates `pattern` in `lines[start..]`. With `end_of_file` only the
/// position that ends at the last line is considered.
pub(crate) fn seek(lines: &[String], pattern: &[&str], start: usize, end_of_file: bool) -> Seek {
    if pattern.len() > lines.len() {
        return Seek::NotFound;
    }
    let last = lines.len() - pattern.len();
    let candidates = if end_of_file {
        (last >= start).then_some(last..last + 1)
    } else {
        (start <= last).then_some(start..last + 1)
    };
    let Some(candidates) = candidates else {
        return Seek::NotFound;
    };

    for eq in PASSES {
        let mut matches = candidates
            .clone()
            .filter(|&at| pattern.iter().enumerate().all(|(offset, expected)| eq(&lines[at + offset], expected)));
        let Some(first) = matches.next() else {
            continue;
        };
        let others = matches.count();
        return if others == 0 {
            Seek::Found(first)
        } else {
            Seek::Ambiguous(others + 1)
        };
    }
    Seek::NotFound
}

fn find_anchor(lines: &[String], anchor: &str, start: usize) -> Option<usize> {
    PASSES
        .iter()
        .find_map(|eq| (start..lines.len()).find(|&at| eq(&lines[at], anchor)))
}

/// Line terminator of the original file, reused when writing it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

pub(crate) fn split_lines(content: &str) -> (Vec<String>, LineEnding) {
    let ending = if content.contains("\r\n") {
        LineEnding::CrLf
    } else {
        LineEnding::Lf
    };
    let mut lines: Vec<String> = content
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect();
    if lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    (lines, ending)
}

/// Applies `hunks` in order to `content`. Each hunk is searched for below the
/// previous one. Any hunk that cannot be placed uniquely rejects the whole
/// file.
pub(crate) fn apply_hunks(path: &Path, content: &str, hunks: &[Hunk]) -> Result<String, FileError> {
    let (mut lines, ending) = split_lines(content);
    let mut replacements: Vec<(usize, usize, Vec<String>)> = Vec::new();
    let mut cursor = 0;

    for (index, hunk) in hunks.iter().enumerate() {
        let number = index + 1;
        let mut start = cursor;
        if let Some(anchor) = &hunk.anchor {
            let Some(at) = find_anchor(&lines, anchor, cursor) else {
                return Err(FileError::ContextNotFound {
                    path: path.to_path_buf(),
                    hunk: number,
                    expected: anchor.clone(),
                });
            };
            start = at + 1;
        }

        let old = hunk.old_lines();
        let new: Vec<String> = hunk.new_lines().into_iter().map(str::to_string).collect();
        if old.is_empty() {
            // Pure insertion: below the anchor, otherwise at the end.
            let at = if hunk.anchor.is_some() && !hunk.end_of_file {
                start
            } else {
                lines.len()
            };
            replacements.push((at, 0, new));
            cursor = at;
            continue;
        }

        match seek(&lines, &old, start, hunk.end_of_file) {
            Seek::Found(at) => {
                replacements.push((at, old.len(), new));
                cursor = at + old.len();
            }
            Seek::NotFound => {
                return Err(FileError::ContextNotFound {
                    path: path.to_path_buf(),
                    hunk: number,
                    expected: old.join("\n"),
                })
            }
            Seek::Ambiguous(matches) => {
                return Err(FileError::Ambiguous {
                    path: path.to_path_buf(),
                    hunk: number,
                    matches,
                })
            }
        }
    }

    for (at, removed, inserted) in replacements.into_iter().rev() {
        lines.splice(at..at + removed, inserted);
    }

    if lines.is_empty() {
        return Ok(String::new());
    }
    let separator = ending.as_str();
    let mut output = lines.join(separator);
    output.push_str(separator);
    Ok(output)
}
