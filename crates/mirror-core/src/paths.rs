//! Maps list names to their files under the mirror root.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Extension of every mirrored list file.
pub const LIST_EXTENSION: &str = ".txt";

/// Resolves a list name to `<root>/<name>.txt`.
///
/// The name is used verbatim as a path segment. A name containing `/` or
/// `..` lands outside the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The mirror root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing the list named `list_name`.
    pub fn resolve(&self, list_name: &str) -> PathBuf {
        let mut path = OsString::from(self.root.as_os_str());
        path.push("/");
        path.push(list_name);
        path.push(LIST_EXTENSION);
        PathBuf::from(path)
    }
}
