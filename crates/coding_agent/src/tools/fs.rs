use std::fs;
use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use serde::Deserialize;

use super::{truncate_to_byte_limit, Sandbox, ToolError, ToolLimits, ToolOutput, GREP_FILES};

pub(crate) const MAX_LIST_DEPTH: usize = 5;
const SKIPPED_DIRS: [&str; 2] = ["target", "node_modules"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ReadFileArgs {
    path: String,
    #[serde(default)]
    start_line: Option<usize>,
    #[serde(default)]
    end_line: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ListDirArgs {
    #[serde(default = "current_dir")]
    path: String,
    #[serde(default = "default_depth")]
    depth: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct GrepFilesArgs {
    pattern: String,
    #[serde(default = "current_dir")]
    path: String,
    #[serde(default)]
    include: Option<String>,
}

fn current_dir() -> String {
    ".".to_string()
}

fn default_depth() -> usize {
    1
}

pub(crate) fn read_file(sandbox: &Sandbox, limits: &ToolLimits, args: ReadFileArgs) -> Result<ToolOutput, ToolError> {
    let resolved = sandbox.resolve_existing(&args.path)?;
    if resolved.is_dir() {
        return Err(ToolError::Failed(format!("'{}' is a directory", args.path)));
    }

    let bytes =
        fs::read(&resolved).map_err(|error| ToolError::Failed(format!("failed to read '{}': {error}", args.path)))?;
    let text = String::from_utf8(bytes).map_err(|_| ToolError::Failed(format!("'{}' is not valid UTF-8 text", args.path)))?;
    let total_lines = text.lines().count();
    let display = sandbox.display(&resolved);

    let (mut content, summary) = if args.start_line.is_none() && args.end_line.is_none() {
        (text, format!("read_file {display} ({total_lines} lines)"))
    } else {
        let start = args.start_line.unwrap_or(1).max(1);
        let end = args.end_line.unwrap_or(total_lines).min(total_lines);
        if start > end {
            return Err(ToolError::Failed(format!(
                "requested lines {start}-{} but '{}' has {total_lines} lines",
                args.end_line.unwrap_or(total_lines),
                args.path
            )));
        }
        let mut numbered = String::new();
        for (index, line) in text.lines().enumerate().skip(start - 1).take(end + 1 - start) {
            numbered.push_str(&format!("{:>6} | {line}\n", index + 1));
        }
        (numbered, format!("read_file {display} (lines {start}-{end} of {total_lines})"))
    };

    let total_bytes = content.len();
    if truncate_to_byte_limit(&mut content, limits.read_max_bytes) {
        content.push_str(&format!(
            "\n[truncated: showing {} of {total_bytes} bytes]",
            content.len()
        ));
    }
    Ok(ToolOutput::new(content, summary))
}

pub(crate) fn list_dir(sandbox: &Sandbox, limits: &ToolLimits, args: ListDirArgs) -> Result<ToolOutput, ToolError> {
    if args.depth == 0 || args.depth > MAX_LIST_DEPTH {
        return Err(ToolError::InvalidArguments {
            tool: super::LIST_DIR,
            message: format!("depth must be between 1 and {MAX_LIST_DEPTH}"),
        });
    }
    let resolved = sandbox.resolve_existing(&args.path)?;
    if !resolved.is_dir() {
        return Err(ToolError::Failed(format!("'{}' is not a directory", args.path)));
    }

    let mut listing = Listing {
        entries: Vec::new(),
        cap: limits.list_max_entries,
        capped: false,
    };
    walk_listing(&resolved, &resolved, args.depth, &mut listing)?;

    let display = sandbox.display(&resolved);
    let count = listing.entries.len();
    let mut content = if listing.entries.is_empty() {
        "(empty directory)".to_string()
    } else {
        listing.entries.join("\n")
    };
    if listing.capped {
        content.push_str(&format!("\n[truncated: showing first {count} entries]"));
    }
    let plural = if count == 1 { "entry" } else { "entries" };
    let capped = if listing.capped { ", capped" } else { "" };
    Ok(ToolOutput::new(content, format!("list_dir {display} ({count} {plural}{capped})")))
}

struct Listing {
    entries: Vec<String>,
    cap: usize,
    capped: bool,
}

fn walk_listing(base: &Path, dir: &Path, depth: usize, listing: &mut Listing) -> Result<(), ToolError> {
    let mut children: Vec<_> = fs::read_dir(dir)
        .map_err(|error| ToolError::Failed(format!("failed to list {}: {error}", dir.display())))?
        .filter_map(Result::ok)
        .collect();
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        if listing.entries.len() >= listing.cap {
            listing.capped = true;
            return Ok(());
        }
        let path = child.path();
        let relative = path.strip_prefix(base).unwrap_or(&path).display().to_string();
        // `file_type` does not follow symlinks.
        let is_dir = child.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
        if is_dir {
            listing.entries.push(format!("{relative}/"));
            if depth > 1 {
                walk_listing(base, &path, depth - 1, listing)?;
            }
        } else {
            listing.entries.push(relative);
        }
    }
    Ok(())
}

pub(crate) fn grep_files(sandbox: &Sandbox, limits: &ToolLimits, args: GrepFilesArgs) -> Result<ToolOutput, ToolError> {
    let regex = Regex::new(&args.pattern).map_err(|error| ToolError::InvalidArguments {
        tool: GREP_FILES,
        message: format!("invalid pattern: {error}"),
    })?;
    let include = args
        .include
        .as_deref()
        .map(|glob| {
            GlobBuilder::new(glob)
                .literal_separator(false)
                .build()
                .map(|glob| glob.compile_matcher())
                .map_err(|error| ToolError::InvalidArguments {
                    tool: GREP_FILES,
                    message: format!("invalid include glob: {error}"),
                })
        })
        .transpose()?;
    let resolved = sandbox.resolve_existing(&args.path)?;

    let mut search = Search {
        sandbox,
        regex: &regex,
        include: include.as_ref(),
        max_file_bytes: limits.grep_max_file_bytes,
        cap: limits.grep_max_matches,
        matches: Vec::new(),
        capped: false,
    };
    if resolved.is_dir() {
        search.walk(&resolved)?;
    } else {
        search.scan_file(&resolved);
    }

    let count = search.matches.len();
    let capped = search.capped;
    let mut content = if search.matches.is_empty() {
        "No matches found.".to_string()
    } else {
        search.matches.join("\n")
    };
    if capped {
        content.push_str(&format!("\n[truncated: stopped after {count} matches]"));
    }
    let plural = if count == 1 { "match" } else { "matches" };
    let suffix = if capped { ", capped" } else { "" };
    Ok(ToolOutput::new(
        content,
        format!("grep_files '{}' ({count} {plural}{suffix})", args.pattern),
    ))
}

struct Search<'a> {
    sandbox: &'a Sandbox,
    regex: &'a Regex,
    include: Option<&'a GlobMatcher>,
    max_file_bytes: u64,
    cap: usize,
    matches: Vec<String>,
    capped: bool,
}

impl Search<'_> {
    fn walk(&mut self, dir: &Path) -> Result<(), ToolError> {
        let mut children: Vec<_> = fs::read_dir(dir)
            .map_err(|error| ToolError::Failed(format!("failed to read {}: {error}", dir.display())))?
            .filter_map(Result::ok)
            .collect();
        children.sort_by_key(|entry| entry.file_name());

        for child in children {
            if self.capped {
                return Ok(());
            }
            let Ok(kind) = child.file_type() else {
                continue;
            };
            let path = child.path();
            let name = child.file_name();
            let name = name.to_string_lossy();
            if kind.is_dir() {
                if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref()) {
                    continue;
                }
                self.walk(&path)?;
            } else if kind.is_file() {
                self.scan_file(&path);
            }
        }
        Ok(())
    }

    fn scan_file(&mut self, path: &Path) {
        let display = self.sandbox.display(path);
        if let Some(include) = self.include {
            let file_name = path.file_name().map(Path::new);
            if !include.is_match(&display) && !file_name.is_some_and(|name| include.is_match(name)) {
                return;
            }
        }
        let too_large = fs::metadata(path).map_or(true, |metadata| metadata.len() > self.max_file_bytes);
        if too_large {
            return;
        }
        let Ok(bytes) = fs::read(path) else {
            return;
        };
        if bytes.contains(&0) {
            return;
        }
        let Ok(text) = String::from_utf8(bytes) else {
            return;
        };

        for (index, line) in text.lines().enumerate() {
            if !self.regex.is_match(line) {
                continue;
            }
            if self.matches.len() >= self.cap {
                self.capped = true;
                return;
            }
            self.matches.push(format!("{display}:{}: {line}", index + 1));
        }
    }
}
