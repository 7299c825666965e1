//! File system access used by the workspace loader.
//!
//! Everything goes through the [`FileSystem`] trait so tests can run
//! against an in-memory tree instead of touching disk.

use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    fn exists(&self, path: &Path) -> bool;
}

/// The real file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// An in-memory file tree keyed by normalized path.
#[derive(Debug, Default)]
pub struct MemoryFs {
    files: BTreeMap<PathBuf, String>,
}

impl MemoryFs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) {
        self.files.insert(normalize_path(&path.into()), text.into());
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }
}

impl FileSystem for MemoryFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(&normalize_path(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{}", path.display())))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(&normalize_path(path))
    }
}

/// Lexically normalizes a path: resolves `.` and `..` components without
/// consulting the file system, so `a/b/../c.xml` and `a/c.xml` collide in
/// the loaded-file map.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
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
    use pretty_assertions::assert_eq;

    #[test]
    fn normalization_folds_dot_and_dot_dot() {
        assert_eq!(
            normalize_path(Path::new("/ws/a/./b/../c.xml")),
            PathBuf::from("/ws/a/c.xml")
        );
        assert_eq!(normalize_path(Path::new("../up.xml")), PathBuf::from("../up.xml"));
    }

    #[test]
    fn memory_fs_reads_through_unnormalized_paths() {
        let fs = MemoryFs::new().with_file("/ws/build.xml", "<project/>");
        assert!(fs.exists(Path::new("/ws/./build.xml")));
        assert_eq!(
            fs.read_to_string(Path::new("/ws/x/../build.xml")).unwrap(),
            "<project/>"
        );
        assert!(fs.read_to_string(Path::new("/ws/other.xml")).is_err());
    }
}
