use std::path::PathBuf;

use crate::error::ParseError;

pub(crate) const BEGIN_PATCH: &str = "*** Begin Patch";
pub(crate) const END_PATCH: &str = "*** End Patch";
pub(crate) const ADD_FILE: &str = "*** Add File: ";
pub(crate) const UPDATE_FILE: &str = "*** Update File: ";
pub(crate) const DELETE_FILE: &str = "*** Delete File: ";
pub(crate) const MOVE_TO: &str = "*** Move to: ";
pub(crate) const END_OF_FILE: &str = "*** End of File";
pub(crate) const HUNK_MARKER: &str = "@@";

/// A parsed patch: file operations in the order they appear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub ops: Vec<PatchOp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOp {
    AddFile {
        path: PathBuf,
        content: String,
    },
    UpdateFile {
        path: PathBuf,
        move_to: Option<PathBuf>,
        hunks: Vec<Hunk>,
    },
    DeleteFile {
        path: PathBuf,
    },
}

impl PatchOp {
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::AddFile { path, .. } | Self::UpdateFile { path, .. } | Self::DeleteFile { path } => path,
        }
    }
}

/// A region addressed by its surrounding lines rather than line numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hunk {
    /// Text after `@@`; the hunk is searched for below the first line equal
    /// to it.
    pub anchor: Option<String>,
    pub lines: Vec<HunkLine>,
    /// Set by `*** End of File`: the hunk must match the end of the file.
    pub end_of_file: bool,
}

impl Hunk {
    /// Lines the hunk expects to find (context and removals).
    #[must_use]
    pub fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                HunkLine::Context(text) | HunkLine::Remove(text) => Some(text.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }

    /// Lines that replace the match (context and additions).
    #[must_use]
    pub fn new_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                HunkLine::Context(text) | HunkLine::Add(text) => Some(text.as_str()),
                HunkLine::Remove(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

/// Parses patch text. Surrounding whitespace is ignored; everything between
/// the begin and end markers must be a well-formed file section.
pub fn parse_patch(text: &str) -> Result<Patch, ParseError> {
    let lines: Vec<&str> = text.trim().lines().map(|line| line.strip_suffix('\r').unwrap_or(line)).collect();

    match lines.first() {
        Some(first) if first.trim() == BEGIN_PATCH => {}
        _ => return Err(ParseError::new(1, format!("first line must be '{BEGIN_PATCH}'"))),
    }
    match lines.last() {
        Some(last) if lines.len() > 1 && last.trim() == END_PATCH => {}
        _ => return Err(ParseError::new(lines.len(), format!("last line must be '{END_PATCH}'"))),
    }

    let body = &lines[1..lines.len() - 1];
    let mut cursor = Cursor { lines: body, index: 0 };
    let mut ops = Vec::new();
    while let Some(line) = cursor.peek() {
        let line_number = cursor.line_number();
        if let Some(path) = line.strip_prefix(ADD_FILE) {
            cursor.advance();
            ops.push(parse_add(&mut cursor, parse_path(path, line_number)?)?);
        } else if let Some(path) = line.strip_prefix(DELETE_FILE) {
            cursor.advance();
            ops.push(PatchOp::DeleteFile {
                path: parse_path(path, line_number)?,
            });
        } else if let Some(path) = line.strip_prefix(UPDATE_FILE) {
            cursor.advance();
            ops.push(parse_update(&mut cursor, parse_path(path, line_number)?)?);
        } else if line.trim().is_empty() {
            cursor.advance();
        } else {
            return Err(ParseError::new(
                line_number,
                format!("'{line}' is not a valid file header; expected Add File, Update File or Delete File"),
            ));
        }
    }

    if ops.is_empty() {
        return Err(ParseError::new(1, "patch contains no file operations"));
    }
    Ok(Patch { ops })
}

struct Cursor<'a> {
    lines: &'a [&'a str],
    index: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.index).copied()
    }

    fn advance(&mut self) {
        self.index += 1;
    }

    /// 1-based line number in the original text (the begin marker is line 1).
    fn line_number(&self) -> usize {
        self.index + 2
    }

    fn at_file_header(&self) -> bool {
        self.peek().is_some_and(|line| {
            line.starts_with(ADD_FILE) || line.starts_with(UPDATE_FILE) || line.starts_with(DELETE_FILE)
        })
    }
}

fn parse_path(raw: &str, line_number: usize) -> Result<PathBuf, ParseError> {
    let path = raw.trim();
    if path.is_empty() {
        return Err(ParseError::new(line_number, "file header is missing a path"));
    }
    Ok(PathBuf::from(path))
}

fn parse_add(cursor: &mut Cursor<'_>, path: PathBuf) -> Result<PatchOp, ParseError> {
    let mut content = String::new();
    while let Some(line) = cursor.peek() {
        if cursor.at_file_header() {
            break;
        }
        let Some(text) = line.strip_prefix('+') else {
            return Err(ParseError::new(
                cursor.line_number(),
                format!("added file {} expects lines starting with '+'", path.display()),
            ));
        };
        content.push_str(text);
        content.push('\n');
        cursor.advance();
    }
    Ok(PatchOp::AddFile { path, content })
}

fn parse_update(cursor: &mut Cursor<'_>, path: PathBuf) -> Result<PatchOp, ParseError> {
    let mut move_to = None;
    if let Some(destination) = cursor.peek().and_then(|line| line.strip_prefix(MOVE_TO)) {
        move_to = Some(parse_path(destination, cursor.line_number())?);
        cursor.advance();
    }

    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;
    while let Some(line) = cursor.peek() {
        if cursor.at_file_header() {
            break;
        }
        let line_number = cursor.line_number();
        cursor.advance();

        if let Some(anchor) = line.strip_prefix(HUNK_MARKER) {
            if let Some(done) = current.take() {
                hunks.push(close_hunk(done, &path, line_number)?);
            }
            let anchor = anchor.trim();
            current = Some(Hunk {
                anchor: (!anchor.is_empty()).then(|| anchor.to_string()),
                ..Hunk::default()
            });
            continue;
        }
        if line.trim_end() == END_OF_FILE {
            let Some(mut hunk) = current.take() else {
                return Err(ParseError::new(line_number, "'*** End of File' outside of a hunk"));
            };
            hunk.end_of_file = true;
            hunks.push(close_hunk(hunk, &path, line_number)?);
            continue;
        }

        let hunk_line = match line.chars().next() {
            Some(' ') => HunkLine::Context(line[1..].to_string()),
            Some('-') => HunkLine::Remove(line[1..].to_string()),
            Some('+') => HunkLine::Add(line[1..].to_string()),
            None => HunkLine::Context(String::new()),
            Some(_) => {
                return Err(ParseError::new(
                    line_number,
                    format!("unexpected line in update of {}: '{line}'", path.display()),
                ))
            }
        };
        // The first hunk may omit its `@@` marker.
        if current.is_none() && hunks.is_empty() {
            current = Some(Hunk::default());
        }
        match current.as_mut() {
            Some(hunk) => hunk.lines.push(hunk_line),
            None => {
                return Err(ParseError::new(
                    line_number,
                    format!("hunk line after '*** End of File' in {}", path.display()),
                ))
            }
        }
    }
    if let Some(done) = current.take() {
        hunks.push(close_hunk(done, &path, cursor.line_number())?);
    }

    if hunks.is_empty() && move_to.is_none() {
        return Err(ParseError::new(
            cursor.line_number(),
            format!("update of {} contains no hunks", path.display()),
        ));
    }
    Ok(PatchOp::UpdateFile { path, move_to, hunks })
}

fn close_hunk(hunk: Hunk, path: &std::path::Path, line_number: usize) -> Result<Hunk, ParseError> {
    if hunk.lines.is_empty() {
        return Err(ParseError::new(
            line_number,
            format!("empty hunk in update of {}", path.display()),
        ));
    }
    Ok(hunk)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::{parse_patch, Hunk, HunkLine, PatchOp};

    #[test]
    fn parses_every_operation_kind() {
        let patch = parse_patch(
            "*** Begin Patch\n\
             *** Add File: new.txt\n\
             +one\n\
             +two\n\
             *** Update File: src/lib.rs\n\
             *** Move to: src/core.rs\n\
             @@ fn main() {\n \
             let a = 1;\n\
             -let b = 2;\n\
             +let b = 3;\n\
             @@\n\
             -tail\n\
             +end\n\
             *** End of File\n\
             *** Delete File: old.txt\n\
             *** End Patch\n",
        )
        .expect("parses");

        assert_eq!(
            patch.ops,
            vec![
                PatchOp::AddFile {
                    path: PathBuf::from("new.txt"),
                    content: "one\ntwo\n".to_string(),
                },
                PatchOp::UpdateFile {
                    path: PathBuf::from("src/lib.rs"),
                    move_to: Some(PathBuf::from("src/core.rs")),
                    hunks: vec![
                        Hunk {
                            anchor: Some("fn main() {".to_string()),
                            lines: vec![
                                HunkLine::Context("let a = 1;".to_string()),
                                HunkLine::Remove("let b = 2;".to_string()),
                                HunkLine::Add("let b = 3;".to_string()),
                            ],
                            end_of_file: false,
                        },
                        Hunk {
                            anchor: None,
                            lines: vec![HunkLine::Remove("tail".to_string()), HunkLine::Add("end".to_string())],
                            end_of_file: true,
                        },
                    ],
                },
                PatchOp::DeleteFile {
                    path: PathBuf::from("old.txt"),
                },
            ]
        );
    }

    #[test]
    fn first_hunk_marker_is_optional_and_blank_lines_are_context() {
        let patch = parse_patch("*** Begin Patch\n*** Update File: a.txt\n a\n\n-b\n+c\n*** End Patch").expect("parses");
        let PatchOp::UpdateFile { hunks, .. } = &patch.ops[0] else {
            panic!("expected update");
        };
        assert_eq!(hunks[0].old_lines(), ["a", "", "b"]);
        assert_eq!(hunks[0].new_lines(), ["a", "", "c"]);
    }

    #[test]
    fn rejects_malformed_patches() {
        let cases = [
            "*** Add File: a\n+x\n*** End Patch",
            "*** Begin Patch\n*** Add File: foo\n+bad",
            "*** Begin Patch\n*** End Patch",
            "*** Begin Patch\n*** Add File: a\nno plus\n*** End Patch",
            "*** Begin Patch\n*** Update File: a\n*** End Patch",
            "*** Begin Patch\n*** Update File: a\n@@\n*** End Patch",
            "*** Begin Patch\n*** Frobnicate File: a\n*** End Patch",
            "*** Begin Patch\n*** Update File: a\n?odd\n*** End Patch",
        ];
        for case in cases {
            let error = parse_patch(case).expect_err(case);
            assert!(error.to_string().starts_with("invalid patch"), "{error}");
        }
    }

    #[test]
    fn error_reports_line_number() {
        let error = parse_patch("*** Begin Patch\n*** Add File: a\n+x\nbad\n*** End Patch").expect_err("fails");
        assert_eq!(error.line, 4);
    }
}
