use std::path::{Component, Path, PathBuf};

use super::ToolError;

/// Resolves tool path arguments against a canonical workspace root.
///
/// Symlinks along the path are followed before `..` is folded, so a path is
/// judged by where the filesystem would actually take it. A path is rejected
/// when that location is outside the root.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: &Path) -> Result<Self, ToolError> {
        let root = root
            .canonicalize()
            .map_err(|error| ToolError::Failed(format!("failed to resolve workspace root {}: {error}", root.display())))?;
        if !root.is_dir() {
            return Err(ToolError::Failed(format!(
                "workspace root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical path of an existing file or directory inside the root.
    pub fn resolve_existing(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let candidate = self.walk(raw)?;
        let canonical = match candidate.canonicalize() {
            Ok(canonical) => canonical,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::NotFound { path: raw.to_string() });
            }
            Err(error) => return Err(ToolError::Failed(format!("failed to resolve '{raw}': {error}"))),
        };
        self.ensure_inside(raw, &canonical)?;
        Ok(canonical)
    }

    /// Path that may not exist yet. Every directory on the way is resolved;
    /// a final component that is itself a symlink is kept as the link, but
    /// its target must be inside the root as well.
    pub fn resolve_for_write(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let candidate = self.walk(raw)?;
        if candidate.symlink_metadata().is_ok() {
            let canonical = candidate
                .canonicalize()
                .map_err(|error| ToolError::Failed(format!("failed to resolve '{raw}': {error}")))?;
            self.ensure_inside(raw, &canonical)?;
            return Ok(candidate);
        }

        let anchor = canonicalize_existing_ancestor(&candidate)?;
        self.ensure_inside(raw, &anchor)?;
        Ok(candidate)
    }

    /// [`Self::resolve_for_write`], relative to the root.
    pub fn relative_for_write(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let resolved = self.resolve_for_write(raw)?;
        resolved
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .map_err(|_| violation(raw))
    }

    /// `path` relative to the root for display, or as-is when outside.
    #[must_use]
    pub fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) if relative.as_os_str().is_empty() => ".".to_string(),
            Ok(relative) => relative.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }

    /// Walks `raw` one component at a time from the root. Every component
    /// that has more components after it is canonicalized when it exists, so
    /// a following `..` leaves the symlink's real target and not its name.
    fn walk(&self, raw: &str) -> Result<PathBuf, ToolError> {
        if raw.trim().is_empty() {
            return Err(ToolError::Failed("path must not be empty".to_string()));
        }
        if raw.contains('\0') {
            return Err(ToolError::Failed("path contains a NUL byte".to_string()));
        }

        let path = Path::new(raw);
        let mut current = if path.is_absolute() {
            PathBuf::new()
        } else {
            self.root.clone()
        };
        let mut components = path.components().peekable();
        while let Some(component) = components.next() {
            match component {
                Component::Prefix(_) | Component::RootDir => current.push(component),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !current.pop() {
                        return Err(violation(raw));
                    }
                }
                Component::Normal(name) => {
                    current.push(name);
                    if components.peek().is_some() && current.symlink_metadata().is_ok() {
                        current = current.canonicalize().map_err(|error| {
                            ToolError::Failed(format!("failed to resolve '{raw}' at {}: {error}", current.display()))
                        })?;
                    }
                }
            }
        }

        if !current.starts_with(&self.root) {
            tracing::warn!(path = raw, resolved = %current.display(), "path escapes workspace root");
            return Err(violation(raw));
        }
        Ok(current)
    }

    fn ensure_inside(&self, raw: &str, canonical: &Path) -> Result<(), ToolError> {
        if canonical.starts_with(&self.root) {
            Ok(())
        } else {
            tracing::warn!(path = raw, resolved = %canonical.display(), "path escapes workspace root");
            Err(violation(raw))
        }
    }
}

fn violation(raw: &str) -> ToolError {
    ToolError::SandboxViolation { path: raw.to_string() }
}

fn canonicalize_existing_ancestor(path: &Path) -> Result<PathBuf, ToolError> {
    for ancestor in path.ancestors() {
        if ancestor.exists() {
            return ancestor
                .canonicalize()
                .map_err(|error| ToolError::Failed(format!("failed to resolve {}: {error}", ancestor.display())));
        }
    }

    Err(ToolError::Failed(format!(
        "no existing ancestor found for {}",
        path.display()
    )))
}
