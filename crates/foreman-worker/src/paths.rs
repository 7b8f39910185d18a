//! Confinement of model-supplied paths to the workspace root.

use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::ToolError;

/// Resolve `requested` against `root`, refusing anything that lands outside it.
///
/// `root` must already be canonical. Traversal segments are folded lexically
/// and may never climb above the root; every existing prefix of the result is
/// then canonicalized so a symbolic link cannot redirect outside the root. A
/// dangling link is rejected because its target cannot be checked.
///
/// The returned path has all existing symlinks resolved; components that do
/// not exist yet are appended as given.
pub fn resolve_in(root: &Path, requested: &str) -> Result<PathBuf, ToolError> {
    if requested.is_empty() {
        return Err(ToolError::InvalidArgument("empty path".to_string()));
    }
    if requested.contains('\0') {
        return Err(ToolError::PathEscape(requested.to_string()));
    }

    let requested_path = Path::new(requested);
    let relative = if requested_path.is_absolute() {
        requested_path
            .strip_prefix(root)
            .map_err(|_| ToolError::PathEscape(requested.to_string()))?
    } else {
        requested_path
    };

    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(ToolError::PathEscape(requested.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ToolError::PathEscape(requested.to_string()));
            }
        }
    }

    // Longest prefix that exists on disk (without following the last link).
    let mut existing = root.to_path_buf();
    let mut consumed = 0;
    for part in &parts {
        let next = existing.join(part);
        match std::fs::symlink_metadata(&next) {
            Ok(_) => {
                existing = next;
                consumed += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(ToolError::Io(e)),
        }
    }

    let canonical = match existing.canonicalize() {
        Ok(path) => path,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ToolError::PathEscape(format!(
                "{requested} (dangling symlink)"
            )));
        }
        Err(e) => return Err(ToolError::Io(e)),
    };
    if !canonical.starts_with(root) {
        return Err(ToolError::PathEscape(requested.to_string()));
    }

    let mut resolved = canonical;
    for part in &parts[consumed..] {
        resolved.push(part);
    }
    Ok(resolved)
}

/// Path of `path` relative to `root`, for display.
pub fn display_relative(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        (dir, canonical)
    }

    #[test]
    fn test_plain_and_nested_paths_resolve_inside() {
        let (_dir, root) = root();
        assert_eq!(resolve_in(&root, "a.txt").unwrap(), root.join("a.txt"));
        assert_eq!(
            resolve_in(&root, "./sub/../b/c.txt").unwrap(),
            root.join("b/c.txt")
        );
        assert_eq!(resolve_in(&root, ".").unwrap(), root);
    }

    #[test]
    fn test_traversal_is_rejected() {
        let (_dir, root) = root();
        for bad in ["..", "../x", "a/../../x", "./../../etc/passwd"] {
            assert!(
                matches!(resolve_in(&root, bad), Err(ToolError::PathEscape(_))),
                "{bad} should escape"
            );
        }
    }

    #[test]
    fn test_absolute_paths_must_be_under_root() {
        let (_dir, root) = root();
        assert!(matches!(
            resolve_in(&root, "/etc/passwd"),
            Err(ToolError::PathEscape(_))
        ));
        let inside = root.join("ok.txt");
        assert_eq!(
            resolve_in(&root, inside.to_str().unwrap()).unwrap(),
            inside
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escapes_are_rejected() {
        let (_dir, root) = root();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), root.join("file_link"))
            .unwrap();
        std::os::unix::fs::symlink("/nonexistent/target", root.join("dangling")).unwrap();

        for bad in ["link", "link/secret", "link/new.txt", "file_link", "dangling"] {
            assert!(
                matches!(resolve_in(&root, bad), Err(ToolError::PathEscape(_))),
                "{bad} should escape"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_within_root_is_allowed() {
        let (_dir, root) = root();
        std::fs::create_dir(root.join("real")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("alias")).unwrap();
        assert_eq!(
            resolve_in(&root, "alias/f.txt").unwrap(),
            root.join("real/f.txt")
        );
    }

    #[test]
    fn test_empty_and_nul_paths() {
        let (_dir, root) = root();
        assert!(matches!(
            resolve_in(&root, ""),
            Err(ToolError::InvalidArgument(_))
        ));
        assert!(matches!(
            resolve_in(&root, "a\0b"),
            Err(ToolError::PathEscape(_))
        ));
    }
}
