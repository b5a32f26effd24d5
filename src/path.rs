// src/path.rs

//! Workspace path containment
//!
//! Operations address files by workspace-relative paths. Paths come from
//! declarative setup definitions, which may be authored or generated
//! elsewhere, so every path is normalized and checked against the workspace
//! root before any I/O happens. A single `..` that would escape the root
//! rejects the whole operation.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Normalize an operation path to a safe workspace-relative form
///
/// 1. Rejects paths containing `..` (parent directory) components
/// 2. Skips `.` (current directory) components
/// 3. Strips leading slashes to make the path relative
/// 4. Returns an error for empty paths
///
/// # Examples
///
/// ```
/// use setforge::path::normalize_relative;
/// use std::path::PathBuf;
///
/// assert_eq!(normalize_relative(".kb/demo.txt").unwrap(), PathBuf::from(".kb/demo.txt"));
/// assert_eq!(normalize_relative("/package.json").unwrap(), PathBuf::from("package.json"));
/// assert!(normalize_relative("../outside").is_err());
/// ```
pub fn normalize_relative(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let path_str = path.to_string_lossy();

    let relative = path_str.trim_start_matches('/');

    let mut normalized = PathBuf::new();

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => {
                normalized.push(c);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::PathEscape(path_str.to_string()));
            }
            Component::Prefix(_) | Component::RootDir => {
                // Already stripped leading slashes; skip Windows prefixes
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::InvalidPath(
            "empty path after normalization".to_string(),
        ));
    }

    Ok(normalized)
}

/// Resolve an operation path under the workspace root
///
/// Normalizes the path and joins it with the root, guaranteeing the result
/// stays inside the workspace. When both sides canonicalize, the result is
/// re-checked against the canonical root to catch symlinked escapes.
///
/// # Examples
///
/// ```
/// use setforge::path::resolve_in_workspace;
/// use std::path::{Path, PathBuf};
///
/// let root = Path::new("/work/project");
/// assert_eq!(
///     resolve_in_workspace(root, ".kb/demo.txt").unwrap(),
///     PathBuf::from("/work/project/.kb/demo.txt")
/// );
/// assert!(resolve_in_workspace(root, "../etc/passwd").is_err());
/// ```
pub fn resolve_in_workspace(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf> {
    let root = root.as_ref();
    let normalized = normalize_relative(path.as_ref())?;
    let joined = root.join(&normalized);

    if let (Ok(canonical_root), Ok(canonical_joined)) = (root.canonicalize(), joined.canonicalize())
        && !canonical_joined.starts_with(&canonical_root)
    {
        return Err(Error::PathEscape(format!(
            "{} escapes workspace {}",
            joined.display(),
            root.display()
        )));
    }
    // If canonicalize fails (target doesn't exist yet) the component check
    // above already guarantees containment.

    Ok(joined)
}

/// Sanitize a string for use in a backup file name
///
/// Replaces any character outside `[A-Za-z0-9._-]` with `_`, so operation
/// ids and relative paths can be embedded in a flat backup directory.
pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
