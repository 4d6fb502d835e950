//! Canonical path helpers.
//!
//! Every path that enters the registry or an index is first passed through
//! [`normalize`], so nesting checks can stay purely lexical. Comparisons are
//! component-wise: `/a/bc` is not inside `/a/b`. No case folding is applied.

use std::path::{Component, Path, PathBuf};

/// Make `path` absolute against the current directory and resolve `.` and `..` lexically.
///
/// Symlinks are not resolved.
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Whether `path` is `dir` itself or lies anywhere beneath it.
pub fn is_within(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
}

/// Whether `path` lies beneath `dir`, excluding `dir` itself.
pub fn is_nested(path: &Path, dir: &Path) -> bool {
    path != dir && path.starts_with(dir)
}

/// The parent directory shared by every path, or `None` if they differ.
///
/// Returns `Err` with the first offending path.
pub fn shared_parent<'a>(
    paths: impl IntoIterator<Item = &'a PathBuf>,
) -> Result<Option<&'a Path>, (&'a Path, &'a Path)> {
    let mut expected: Option<&Path> = None;
    for path in paths {
        let parent = path.parent().unwrap_or(path);
        match expected {
            None => expected = Some(parent),
            Some(dir) if dir == parent => {}
            Some(dir) => return Err((dir, path.as_path())),
        }
    }
    Ok(expected)
}
