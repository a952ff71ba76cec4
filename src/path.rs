//! Lexical path helpers used by the resolvers.

use std::path::{Component, Components, Path, PathBuf};

/// Resolves `.`, `..` and empty segments without touching any filesystem.
/// An empty path normalizes to `.`; `..` above an absolute root is clamped
/// at the root, while relative paths keep their leading `..` components.
pub(crate) fn lexically_normal(p: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for c in p.components() {
        match c {
            Component::Prefix(_) | Component::RootDir => parts.push(c),
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(c),
            },
            Component::Normal(_) => parts.push(c),
        }
    }

    if parts.is_empty() {
        return PathBuf::from(".");
    }

    let mut out = PathBuf::new();
    for c in parts {
        out.push(c.as_os_str());
    }
    out
}

/// True if the path carries a trailing separator. `Path::components`
/// normalizes trailing separators away, so the raw bytes are inspected.
pub(crate) fn is_dir_shaped(p: &Path) -> bool {
    p.as_os_str().as_encoded_bytes().ends_with(b"/")
}

/// Accumulates the unconsumed suffix of a component stream back into a path.
pub(crate) fn remainder(comps: &Components) -> PathBuf {
    comps.as_path().to_path_buf()
}

/// Lexical equivalent of `p` relative to `base`; `None` when one side is
/// absolute and the other is not, or when `base` has `..` components that
/// cannot be inverted.
pub(crate) fn lexically_relative(p: &Path, base: &Path) -> Option<PathBuf> {
    if p.is_absolute() != base.is_absolute() {
        return None;
    }

    let mut a = p.components();
    let mut b = base.components();
    loop {
        let (ra, rb) = (a.clone(), b.clone());
        match (a.next(), b.next()) {
            (Some(ca), Some(cb)) if ca == cb => continue,
            (ca, cb) => {
                let mut out = PathBuf::new();
                if cb.is_some() {
                    for c in rb {
                        match c {
                            Component::Normal(_) => out.push(".."),
                            Component::ParentDir => return None,
                            _ => {}
                        }
                    }
                }
                if ca.is_some() {
                    out.push(remainder(&ra));
                }
                if out.as_os_str().is_empty() {
                    out.push(".");
                }
                return Some(out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexically_normal() {
        assert_eq!(PathBuf::from("/foo/bar"), lexically_normal(Path::new("/foo/./bar")));
        assert_eq!(PathBuf::from("/foo"), lexically_normal(Path::new("/foo/bar/..")));
        assert_eq!(PathBuf::from("/"), lexically_normal(Path::new("/foo/../..")));
        assert_eq!(PathBuf::from("../foo"), lexically_normal(Path::new("../foo")));
        assert_eq!(PathBuf::from(".."), lexically_normal(Path::new("foo/../..")));
        assert_eq!(PathBuf::from("."), lexically_normal(Path::new("")));
        assert_eq!(PathBuf::from("."), lexically_normal(Path::new("foo/..")));
    }

    #[test]
    fn test_is_dir_shaped() {
        assert!(is_dir_shaped(Path::new("foo/")));
        assert!(is_dir_shaped(Path::new("/")));
        assert!(!is_dir_shaped(Path::new("foo")));
        assert!(!is_dir_shaped(Path::new("/foo/bar")));
    }

    #[test]
    fn test_lexically_relative() {
        assert_eq!(
            Some(PathBuf::from("../bar")),
            lexically_relative(Path::new("/a/bar"), Path::new("/a/foo"))
        );
        assert_eq!(
            Some(PathBuf::from("baz")),
            lexically_relative(Path::new("/a/foo/baz"), Path::new("/a/foo"))
        );
        assert_eq!(
            Some(PathBuf::from(".")),
            lexically_relative(Path::new("/a"), Path::new("/a"))
        );
        assert_eq!(None, lexically_relative(Path::new("a"), Path::new("/a")));
    }
}
