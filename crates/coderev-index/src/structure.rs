//! Directory tree of indexed files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Leaf marker written for files in the serialized tree.
pub const FILE_MARKER: &str = "file";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StructureNode {
    Dir(BTreeMap<String, StructureNode>),
    File(FileMarker),
}

/// Serializes as the string `"file"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMarker;

impl Serialize for FileMarker {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(FILE_MARKER)
    }
}

impl<'de> Deserialize<'de> for FileMarker {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == FILE_MARKER {
            Ok(FileMarker)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected \"{FILE_MARKER}\", got {s:?}"
            )))
        }
    }
}

/// Nested mapping from path segment to a subdirectory or a file leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectStructure {
    root: BTreeMap<String, StructureNode>,
}

impl ProjectStructure {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from project-relative paths.
    pub fn from_files<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut structure = Self::new();
        for file in files {
            structure.insert(file.as_ref());
        }
        structure
    }

    /// Add a file leaf, creating intermediate directories. A directory that
    /// already occupies a segment is replaced only at the leaf position.
    /// Returns `false` if the leaf was already present.
    pub fn insert(&mut self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((leaf, dirs)) = parts.split_last() else {
            return false;
        };

        let mut current = &mut self.root;
        for dir in dirs {
            let node = current
                .entry((*dir).to_string())
                .or_insert_with(|| StructureNode::Dir(BTreeMap::new()));
            if matches!(node, StructureNode::File(_)) {
                *node = StructureNode::Dir(BTreeMap::new());
            }
            let StructureNode::Dir(children) = node else {
                return false;
            };
            current = children;
        }

        if matches!(current.get(*leaf), Some(StructureNode::File(_))) {
            return false;
        }
        current.insert((*leaf).to_string(), StructureNode::File(FileMarker));
        true
    }

    /// Remove a file leaf and prune directories left empty.
    /// Returns `false` if no such leaf existed.
    pub fn remove(&mut self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.is_empty() {
            return false;
        }
        remove_in(&mut self.root, &parts)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        let mut current = &self.root;
        let mut parts = path.split('/').filter(|s| !s.is_empty()).peekable();
        while let Some(part) = parts.next() {
            match (current.get(part), parts.peek()) {
                (Some(StructureNode::File(_)), None) => return true,
                (Some(StructureNode::Dir(children)), Some(_)) => current = children,
                _ => return false,
            }
        }
        false
    }

    /// All file leaves as project-relative paths, sorted.
    #[must_use]
    pub fn files(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_files(&self.root, "", &mut out);
        out
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

fn remove_in(map: &mut BTreeMap<String, StructureNode>, parts: &[&str]) -> bool {
    match parts {
        [] => false,
        [leaf] => {
            if matches!(map.get(*leaf), Some(StructureNode::File(_))) {
                map.remove(*leaf);
                true
            } else {
                false
            }
        }
        [dir, rest @ ..] => {
            let Some(StructureNode::Dir(children)) = map.get_mut(*dir) else {
                return false;
            };
            let removed = remove_in(children, rest);
            if removed && children.is_empty() {
                map.remove(*dir);
            }
            removed
        }
    }
}

fn collect_files(map: &BTreeMap<String, StructureNode>, prefix: &str, out: &mut Vec<String>) {
    for (name, node) in map {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        match node {
            StructureNode::File(_) => out.push(path),
            StructureNode::Dir(children) => collect_files(children, &path, out),
        }
    }
}
