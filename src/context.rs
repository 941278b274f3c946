//! Per-run path facts derived from the workspace root and the active file
//!
//! Paths are compared textually after normalizing separators, so a Windows
//! style path yields the same forward-slash values on every host.

use crate::error::{FilesystemError, PreconditionError};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathContext {
    pub workspace_root: PathBuf,
    pub active_file: PathBuf,
    /// Active file relative to the workspace root, always `/`-separated.
    pub relative_file_path: String,
    pub file_name: String,
    /// Containing directory relative to the root, `.` for top-level files.
    pub source_dir: String,
}

impl PathContext {
    pub fn new(workspace_root: &Path, active_file: &Path) -> Result<Self, PreconditionError> {
        let root_text = normalize_separators(&workspace_root.to_string_lossy());
        let file_text = normalize_separators(&active_file.to_string_lossy());

        let outside = || PreconditionError::OutsideWorkspace {
            file: file_text.clone(),
            workspace: root_text.clone(),
        };

        let relative = strip_root(&root_text, &file_text).ok_or_else(outside)?;
        let relative = normalize_relative(&relative).ok_or_else(outside)?;

        let (source_dir, file_name) = match relative.rsplit_once('/') {
            Some((dir, name)) => (dir.to_string(), name.to_string()),
            None => (".".to_string(), relative.clone()),
        };

        Ok(Self {
            workspace_root: workspace_root.to_path_buf(),
            active_file: active_file.to_path_buf(),
            relative_file_path: relative,
            file_name,
            source_dir,
        })
    }
}

pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

fn is_drive_root(root: &str) -> bool {
    let bytes = root.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn strip_root(root: &str, file: &str) -> Option<String> {
    let prefix = format!("{}/", root.trim_end_matches('/'));
    if file.len() <= prefix.len() || !file.is_char_boundary(prefix.len()) {
        return None;
    }
    let head = &file[..prefix.len()];
    let matches = if is_drive_root(root) {
        head.eq_ignore_ascii_case(&prefix)
    } else {
        head == prefix
    };
    matches.then(|| file[prefix.len()..].to_string())
}

/// Collapse `.` segments and duplicate slashes. `None` if `..` would escape.
fn normalize_relative(relative: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in relative.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// A path confined to the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePath {
    pub absolute: PathBuf,
    pub relative: PathBuf,
}

/// Resolve `candidate` under `workspace_root`, allowing it not to exist yet.
///
/// Rejects absolute paths, parent traversal, and anything whose nearest
/// existing ancestor canonicalizes outside the workspace (symlinks).
pub fn confine_to_workspace(
    workspace_root: &Path,
    candidate: &str,
) -> Result<WorkspacePath, FilesystemError> {
    let reject = |reason: String| FilesystemError::OutsideWorkspace {
        path: candidate.to_string(),
        reason,
    };

    let normalized = normalize_separators(candidate);
    let candidate_path = Path::new(&normalized);
    if normalized.is_empty() {
        return Err(reject("path is empty".to_string()));
    }
    if candidate_path.is_absolute() || normalized.starts_with('/') || is_drive_root(&normalized)
    {
        return Err(reject("absolute paths are not allowed".to_string()));
    }
    if candidate_path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(reject("parent traversal is not allowed".to_string()));
    }

    let root = workspace_root
        .canonicalize()
        .map_err(|e| reject(format!("failed to resolve workspace root: {}", e)))?;
    let joined = root.join(candidate_path);
    let parent = joined
        .parent()
        .ok_or_else(|| reject("path has no parent".to_string()))?;
    let parent_canon = canonicalize_existing_parent(parent).map_err(reject)?;

    if !parent_canon.starts_with(&root) {
        return Err(reject("path escapes the workspace".to_string()));
    }

    let relative = joined
        .strip_prefix(&root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| candidate_path.to_path_buf());

    Ok(WorkspacePath {
        absolute: joined,
        relative,
    })
}

fn canonicalize_existing_parent(path: &Path) -> Result<PathBuf, String> {
    let mut current = path.to_path_buf();
    while !current.exists() {
        if !current.pop() {
            return Err("path has no existing parent".to_string());
        }
    }
    current
        .canonicalize()
        .map_err(|e| format!("failed to resolve {}: {}", current.display(), e))
}
