//! In-memory snapshot of a repository working tree.

use std::collections::BTreeMap;

/// Repository-relative paths (always `/` separated) to file contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceTree {
    files: BTreeMap<String, Vec<u8>>,
}

impl SourceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite a file
    pub fn insert(&mut self, path: &str, contents: impl Into<Vec<u8>>) {
        if let Some(key) = normalize(path) {
            self.files.insert(key, contents.into());
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Contents of `path`; `./a`, `a` and `/a` name the same file
    pub fn open(&self, path: &str) -> Option<&[u8]> {
        normalize(path).and_then(|key| self.files.get(&key).map(Vec::as_slice))
    }
}

/// Canonical key for a repository path; `None` if it escapes the root
fn normalize(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
