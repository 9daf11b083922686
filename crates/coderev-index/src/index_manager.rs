//! Per-file index records and the project structure snapshot.
//!
//! Each file gets one JSON record named by the blake3 hash of its
//! project-relative path, so a record can be replaced or deleted without
//! touching any other. Wiping the index is a directory removal.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::analyzer::CodeElement;
use crate::error::Result;
use crate::languages::Lang;
use crate::layout::RepoLayout;
use crate::structure::ProjectStructure;

/// Persisted summary of one indexed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndexRecord {
    pub file_name: String,
    pub code_hash: String,
    pub language: Lang,
    pub last_modified: DateTime<Utc>,
    pub dependencies: BTreeSet<String>,
}

/// Result of analyzing one file, before it is persisted.
#[derive(Debug, Clone)]
pub struct FileDetail {
    pub file_name: String,
    pub code_hash: String,
    pub language: Lang,
    pub dependencies: BTreeSet<String>,
    pub elements: Vec<CodeElement>,
}

impl FileDetail {
    #[must_use]
    pub fn to_record(&self, last_modified: DateTime<Utc>) -> FileIndexRecord {
        FileIndexRecord {
            file_name: self.file_name.clone(),
            code_hash: self.code_hash.clone(),
            language: self.language,
            last_modified,
            dependencies: self.dependencies.clone(),
        }
    }
}

/// Hex blake3 digest of file content.
#[must_use]
pub fn content_hash(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

pub struct IndexManager {
    records_dir: PathBuf,
    structure_path: PathBuf,
    structure: Mutex<ProjectStructure>,
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("records_dir", &self.records_dir)
            .finish_non_exhaustive()
    }
}

impl IndexManager {
    /// Open the index for a repository, loading the structure snapshot if one
    /// was saved. Nothing is created on disk until the first write.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing structure snapshot cannot be read.
    pub fn open(layout: &RepoLayout) -> Result<Self> {
        let structure_path = layout.structure_path();
        let structure = read_json::<ProjectStructure>(&structure_path)?.unwrap_or_default();
        Ok(Self {
            records_dir: layout.records_dir(),
            structure_path,
            structure: Mutex::new(structure),
        })
    }

    /// Whether any index has been written for this repository.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.records_dir.is_dir()
    }

    fn record_path(&self, file: &str) -> PathBuf {
        let name = blake3::hash(file.as_bytes()).to_hex();
        self.records_dir.join(format!("{name}.json"))
    }

    fn structure_guard(&self) -> MutexGuard<'_, ProjectStructure> {
        self.structure.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read or decoded.
    pub fn get(&self, file: &str) -> Result<Option<FileIndexRecord>> {
        read_json(&self.record_path(file))
    }

    /// True if no record exists for `file` or its hash differs from `live_hash`.
    /// An unreadable record counts as stale.
    #[must_use]
    pub fn is_stale(&self, file: &str, live_hash: &str) -> bool {
        match self.get(file) {
            Ok(Some(record)) => record.code_hash != live_hash,
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(file, "unreadable index record, treating as stale: {e:#}");
                true
            }
        }
    }

    /// Replace the record for the file and add its structure leaf.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn upsert(&self, detail: &FileDetail, last_modified: DateTime<Utc>) -> Result<FileIndexRecord> {
        let record = detail.to_record(last_modified);
        write_json_atomic(&self.record_path(&record.file_name), &record)?;
        self.structure_guard().insert(&record.file_name);
        Ok(record)
    }

    /// Delete the record and structure leaf. Returns whether a record existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be removed.
    pub fn remove(&self, file: &str) -> Result<bool> {
        let existed = match std::fs::remove_file(self.record_path(file)) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        self.structure_guard().remove(file);
        Ok(existed)
    }

    /// Delete every record and reset the in-memory structure.
    ///
    /// # Errors
    ///
    /// Returns an error if the records directory cannot be recreated.
    pub fn clean(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.records_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        std::fs::create_dir_all(&self.records_dir)?;
        *self.structure_guard() = ProjectStructure::new();
        Ok(())
    }

    /// All stored records, sorted by file name.
    ///
    /// # Errors
    ///
    /// Returns an error if the records directory cannot be listed. Individual
    /// corrupt records are skipped with a warning.
    pub fn records(&self) -> Result<Vec<FileIndexRecord>> {
        let entries = match std::fs::read_dir(&self.records_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match read_json::<FileIndexRecord>(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), "skipping corrupt record: {e:#}"),
            }
        }
        records.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(records)
    }

    /// Recompute the structure from a full file list, replacing the current one.
    pub fn rebuild_structure<I, S>(&self, files: I) -> ProjectStructure
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let structure = ProjectStructure::from_files(files);
        *self.structure_guard() = structure.clone();
        structure
    }

    #[must_use]
    pub fn structure(&self) -> ProjectStructure {
        self.structure_guard().clone()
    }

    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub fn save_structure(&self) -> Result<()> {
        let structure = self.structure();
        write_json_atomic(&self.structure_path, &structure)
    }
}

/// Read and decode a JSON file. A missing file is `Ok(None)`.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write pretty JSON through a sibling temp file and rename it into place.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json)
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::layout::RepoName;

    fn layout(dir: &Path) -> RepoLayout {
        RepoLayout::new(dir, RepoName::new("acme", "widgets").unwrap())
    }

    fn detail(file: &str, content: &str) -> FileDetail {
        FileDetail {
            file_name: file.to_string(),
            code_hash: content_hash(content.as_bytes()),
            language: Lang::Python,
            dependencies: BTreeSet::from(["dep.py".to_string()]),
            elements: Vec::new(),
        }
    }

    #[test]
    fn content_hash_is_hex_blake3() {
        let h = content_hash(b"hello");
        assert_eq!(h.len(), 64);
        assert_eq!(h, content_hash(b"hello"));
        assert_ne!(h, content_hash(b"hello!"));
    }

    #[test]
    fn missing_index_does_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::open(&layout(dir.path())).unwrap();
        assert!(!manager.exists());
        assert!(manager.get("a.py").unwrap().is_none());
        assert!(manager.records().unwrap().is_empty());
    }

    #[test]
    fn upsert_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::open(&layout(dir.path())).unwrap();
        let now = Utc::now();

        let record = manager.upsert(&detail("pkg/a.py", "x = 1"), now).unwrap();
        assert!(manager.exists());
        assert_eq!(manager.get("pkg/a.py").unwrap(), Some(record));
        assert!(manager.structure().contains("pkg/a.py"));

        assert!(manager.remove("pkg/a.py").unwrap());
        assert!(manager.get("pkg/a.py").unwrap().is_none());
        assert!(!manager.structure().contains("pkg/a.py"));
        assert!(!manager.remove("pkg/a.py").unwrap());
    }

    #[test]
    fn records_are_named_by_path_hash() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        let manager = IndexManager::open(&l).unwrap();
        manager.upsert(&detail("a.py", "x"), Utc::now()).unwrap();

        let expected = l
            .records_dir()
            .join(format!("{}.json", blake3::hash(b"a.py").to_hex()));
        assert!(expected.is_file());
        assert!(!expected.with_extension("json.tmp").exists());
    }

    #[test]
    fn staleness_follows_content() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::open(&layout(dir.path())).unwrap();
        let hash = content_hash(b"x = 1");

        assert!(manager.is_stale("a.py", &hash));
        manager.upsert(&detail("a.py", "x = 1"), Utc::now()).unwrap();
        assert!(!manager.is_stale("a.py", &hash));
        assert!(manager.is_stale("a.py", &content_hash(b"x = 2")));
    }

    #[test]
    fn corrupt_record_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::open(&layout(dir.path())).unwrap();
        manager.upsert(&detail("a.py", "x"), Utc::now()).unwrap();
        std::fs::write(manager.record_path("a.py"), b"{not json").unwrap();

        assert!(manager.get("a.py").is_err());
        assert!(manager.is_stale("a.py", &content_hash(b"x")));
        assert!(manager.records().unwrap().is_empty());
    }

    #[test]
    fn clean_wipes_records_and_structure() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::open(&layout(dir.path())).unwrap();
        manager.upsert(&detail("a.py", "x"), Utc::now()).unwrap();
        manager.upsert(&detail("b.py", "y"), Utc::now()).unwrap();

        manager.clean().unwrap();
        assert!(manager.exists());
        assert!(manager.records().unwrap().is_empty());
        assert!(manager.structure().is_empty());
    }

    #[test]
    fn structure_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        let manager = IndexManager::open(&l).unwrap();
        manager.rebuild_structure(["src/a.py", "src/b.py"]);
        manager.save_structure().unwrap();

        let reopened = IndexManager::open(&l).unwrap();
        assert_eq!(reopened.structure().files(), ["src/a.py", "src/b.py"]);
    }

    proptest! {
        #[test]
        fn upsert_then_not_stale(content in ".{0,200}") {
            let dir = tempfile::tempdir().unwrap();
            let manager = IndexManager::open(&layout(dir.path())).unwrap();
            manager.upsert(&detail("f.py", &content), Utc::now()).unwrap();
            prop_assert!(!manager.is_stale("f.py", &content_hash(content.as_bytes())));
            let changed = format!("{content}#");
            prop_assert!(manager.is_stale("f.py", &content_hash(changed.as_bytes())));
        }
    }
}
