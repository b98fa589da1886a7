//! Remote path handling.
//!
//! Every path that arrives over the wire is relative to some root (the
//! server's repository or the client's staging directory). Paths are
//! normalized to `/` separators and checked so they can never escape that
//! root.

use crate::error::{PublishError, Result};
use std::path::{Component, Path, PathBuf};

/// Convert a wire path to canonical form: `/` separators, no leading `./`,
/// no trailing `/`.
pub fn normalize_remote(path: &str) -> String {
    let mut p = path.trim().replace('\\', "/");
    while let Some(rest) = p.strip_prefix("./") {
        p = rest.to_string();
    }
    if p == "." {
        p.clear();
    }
    while p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    p
}

/// Resolve `relative` under `root`, rejecting anything that could land
/// outside it. The empty path is rejected; use [`resolve_dir_under`] where
/// the root itself is a valid target.
pub fn resolve_under(root: &Path, relative: &str) -> Result<PathBuf> {
    let rel = normalize_remote(relative);
    if rel.is_empty() {
        return Err(PublishError::UnsafePath {
            path: relative.to_string(),
            reason: "empty path",
        });
    }
    check_relative(root, relative, &rel)
}

/// Like [`resolve_under`] but an empty or `.` path names the root.
pub fn resolve_dir_under(root: &Path, relative: &str) -> Result<PathBuf> {
    let rel = normalize_remote(relative);
    if rel.is_empty() {
        return Ok(root.to_path_buf());
    }
    check_relative(root, relative, &rel)
}

fn check_relative(root: &Path, original: &str, rel: &str) -> Result<PathBuf> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() || rel.starts_with('/') {
        return Err(PublishError::UnsafePath {
            path: original.to_string(),
            reason: "absolute path",
        });
    }

    for component in rel_path.components() {
        match component {
            Component::ParentDir => {
                return Err(PublishError::UnsafePath {
                    path: original.to_string(),
                    reason: "path traversal",
                })
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(PublishError::UnsafePath {
                    path: original.to_string(),
                    reason: "absolute path",
                })
            }
            _ => {}
        }
    }

    let full = root.join(rel_path);
    if !normalize_path(&full).starts_with(normalize_path(root)) {
        return Err(PublishError::UnsafePath {
            path: original.to_string(),
            reason: "escapes root",
        });
    }

    Ok(full)
}

/// Lexical normalization; the path does not have to exist.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            c => normalized.push(c),
        }
    }
    normalized
}

/// Key of `path` relative to `root` with `/` separators, as used for graph
/// nodes and listing names. `None` if `path` is not under `root`.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else if let Some(rest) = path_str.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    }
}

/// `a.cpp` -> `a.cpp.htm`
pub fn page_name(source: &str, extension: &str) -> String {
    format!("{}.{}", source, extension)
}

/// `a.cpp.htm` -> `Some("a.cpp")`; other extensions -> `None`
pub fn source_name<'a>(page: &'a str, extension: &str) -> Option<&'a str> {
    page.strip_suffix(extension)
        .and_then(|s| s.strip_suffix('.'))
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_remote() {
        assert_eq!(normalize_remote(".\\src\\a.cpp"), "src/a.cpp");
        assert_eq!(normalize_remote("././b.h"), "b.h");
        assert_eq!(normalize_remote("dir/"), "dir");
        assert_eq!(normalize_remote("."), "");
        assert_eq!(normalize_remote(""), "");
    }

    #[test]
    fn test_resolve_under_accepts_nested() {
        let root = Path::new("/srv/repo");
        assert_eq!(
            resolve_under(root, "src/a.cpp").unwrap(),
            PathBuf::from("/srv/repo/src/a.cpp")
        );
        assert_eq!(
            resolve_under(root, ".\\b.h").unwrap(),
            PathBuf::from("/srv/repo/b.h")
        );
    }

    #[test]
    fn test_resolve_under_rejects_escapes() {
        let root = Path::new("/srv/repo");
        for bad in ["../etc/passwd", "src/../../x", "/etc/passwd", ""] {
            assert!(
                matches!(
                    resolve_under(root, bad),
                    Err(PublishError::UnsafePath { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_dir_under_root() {
        let root = Path::new("/srv/repo");
        assert_eq!(resolve_dir_under(root, ".").unwrap(), root);
        assert_eq!(resolve_dir_under(root, "").unwrap(), root);
        assert!(resolve_dir_under(root, "..").is_err());
    }

    #[test]
    fn test_relative_key() {
        let root = Path::new("/srv/repo");
        assert_eq!(
            relative_key(root, Path::new("/srv/repo/src/a.cpp")).as_deref(),
            Some("src/a.cpp")
        );
        assert_eq!(relative_key(root, Path::new("/elsewhere/a.cpp")), None);
    }

    #[test]
    fn test_expand_tilde_leaves_plain_paths() {
        assert_eq!(expand_tilde(Path::new("./repo")), PathBuf::from("./repo"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/repo")), home.join("repo"));
        }
    }

    #[test]
    fn test_page_names() {
        assert_eq!(page_name("a.cpp", "htm"), "a.cpp.htm");
        assert_eq!(source_name("a.cpp.htm", "htm"), Some("a.cpp"));
        assert_eq!(source_name("a.cpp", "htm"), None);
        assert_eq!(source_name(".htm", "htm"), None);
    }
}
