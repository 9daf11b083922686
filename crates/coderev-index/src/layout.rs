//! Repository naming and on-disk layout.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::IndexError;

const COLLECTION_PREFIX: &str = "code_elements_";

/// A repository addressed as `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoName {
    owner: String,
    name: String,
}

impl RepoName {
    /// # Errors
    ///
    /// Returns [`IndexError::Other`] if either part is empty or contains a
    /// path separator or `..`.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self, IndexError> {
        let owner = owner.into();
        let name = name.into();
        for part in [&owner, &name] {
            if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
                return Err(IndexError::Other(format!(
                    "invalid repository name: {owner}/{name}"
                )));
            }
        }
        Ok(Self { owner, name })
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Vector collection for this repository, e.g. `code_elements_owner_repo`.
    #[must_use]
    pub fn collection_name(&self) -> String {
        let normalized: String = self
            .full_name()
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{COLLECTION_PREFIX}{normalized}")
    }

    /// Clone URL under `remote_base`, e.g. `https://github.com/owner/name.git`.
    #[must_use]
    pub fn clone_url(&self, remote_base: &str) -> String {
        format!(
            "{}/{}/{}.git",
            remote_base.trim_end_matches('/'),
            self.owner,
            self.name
        )
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoName {
    type Err = IndexError;

    /// Accepts `owner/name` or a clone URL such as
    /// `https://github.com/owner/name.git` or `git@github.com:owner/name.git`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
        let path = if let Some((_, rest)) = trimmed.split_once("://") {
            rest.split_once('/').map_or("", |(_, p)| p)
        } else if let Some((_, rest)) = trimmed.split_once(':') {
            rest
        } else {
            trimmed
        };

        let mut parts = path.rsplit('/').filter(|p| !p.is_empty());
        match (parts.next(), parts.next()) {
            (Some(name), Some(owner)) => Self::new(owner, name),
            _ => Err(IndexError::Other(format!("invalid repository name: {s}"))),
        }
    }
}

/// Paths owned by one repository under the data directory.
#[derive(Debug, Clone)]
pub struct RepoLayout {
    repo: RepoName,
    index_dir: PathBuf,
    source_dir: PathBuf,
}

impl RepoLayout {
    #[must_use]
    pub fn new(data_dir: &Path, repo: RepoName) -> Self {
        let index_dir = data_dir.join("repos").join(repo.owner()).join(repo.name());
        let source_dir = data_dir.join("source").join(repo.owner()).join(repo.name());
        Self {
            repo,
            index_dir,
            source_dir,
        }
    }

    /// Use an existing local tree as the checkout instead of `source/`.
    #[must_use]
    pub fn with_source_dir(mut self, source_dir: PathBuf) -> Self {
        self.source_dir = source_dir;
        self
    }

    #[must_use]
    pub fn repo(&self) -> &RepoName {
        &self.repo
    }

    #[must_use]
    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    #[must_use]
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    #[must_use]
    pub fn records_dir(&self) -> PathBuf {
        self.index_dir.join("records")
    }

    #[must_use]
    pub fn structure_path(&self) -> PathBuf {
        self.index_dir.join("structure.json")
    }

    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        self.index_dir.join("summary.json")
    }

    #[must_use]
    pub fn overview_path(&self) -> PathBuf {
        self.index_dir.join("overview.md")
    }

    #[must_use]
    pub fn exclude_path(&self) -> PathBuf {
        self.index_dir.join("exclude_dirs.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_url_forms() {
        let expected = RepoName::new("ZLMediaKit", "ZLToolKit").unwrap();
        for input in [
            "ZLMediaKit/ZLToolKit",
            "https://github.com/ZLMediaKit/ZLToolKit",
            "https://github.com/ZLMediaKit/ZLToolKit.git",
            "https://github.com/ZLMediaKit/ZLToolKit/",
            "git@github.com:ZLMediaKit/ZLToolKit.git",
        ] {
            assert_eq!(input.parse::<RepoName>().unwrap(), expected, "input {input}");
        }
    }

    #[test]
    fn rejects_invalid_names() {
        assert!("justname".parse::<RepoName>().is_err());
        assert!("".parse::<RepoName>().is_err());
        assert!(RepoName::new("..", "x").is_err());
    }

    #[test]
    fn collection_name_is_normalized() {
        let repo = RepoName::new("My-Org", "Repo.Name").unwrap();
        assert_eq!(repo.collection_name(), "code_elements_my_org_repo_name");
    }

    #[test]
    fn clone_url_uses_remote_base() {
        let repo = RepoName::new("a", "b").unwrap();
        assert_eq!(repo.clone_url("https://github.com/"), "https://github.com/a/b.git");
    }

    #[test]
    fn layout_paths() {
        let layout = RepoLayout::new(Path::new("/data"), RepoName::new("o", "n").unwrap());
        assert_eq!(layout.records_dir(), Path::new("/data/repos/o/n/records"));
        assert_eq!(layout.structure_path(), Path::new("/data/repos/o/n/structure.json"));
        assert_eq!(layout.exclude_path(), Path::new("/data/repos/o/n/exclude_dirs.json"));
        assert_eq!(layout.source_dir(), Path::new("/data/source/o/n"));

        let local = layout.with_source_dir(PathBuf::from("/work/tree"));
        assert_eq!(local.source_dir(), Path::new("/work/tree"));
    }
}
