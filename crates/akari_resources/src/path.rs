//! Canonical form of resource paths

use std::path::{Component, Path, PathBuf};

/// Lexically normalizes `path`: `.` components are dropped and `..` pops the previous
/// component. The filesystem is never consulted, so the file doesn't need to exist.
pub fn normalize(path: impl AsRef<Path>) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.as_ref().components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last = normalized.components().next_back();
                let pops = matches!(last, Some(Component::Normal(_)));
                let at_root = matches!(last, Some(Component::RootDir | Component::Prefix(_)));

                if pops {
                    normalized.pop();
                } else if !at_root {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_relative() {
        assert_eq!(normalize("./a.asset"), PathBuf::from("a.asset"));
        assert_eq!(normalize("dir/../a.asset"), PathBuf::from("a.asset"));
        assert_eq!(normalize("dir/./sub//b.asset"), PathBuf::from("dir/sub/b.asset"));
        assert_eq!(normalize("../a.asset"), PathBuf::from("../a.asset"));
        assert_eq!(normalize("../../a"), PathBuf::from("../../a"));
    }

    #[test]
    fn normalize_absolute() {
        assert_eq!(normalize("/data/../a.asset"), PathBuf::from("/a.asset"));
        assert_eq!(normalize("/../a.asset"), PathBuf::from("/a.asset"));
    }
}
