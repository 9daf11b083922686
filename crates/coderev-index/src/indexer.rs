//! Repository orchestrator: checkout → analyze → record → embed → store.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use coderev_llm::LlmProvider;
use futures::StreamExt;
use tokio::sync::OnceCell;

use crate::analyzer::{AnalyzerRegistry, ProjectFiles};
use crate::checkout::{Checkout, CheckoutStatus};
use crate::engine::Engine;
use crate::error::{IndexError, Result};
use crate::index_manager::{FileDetail, IndexManager, content_hash, read_json, write_atomic, write_json_atomic};
use crate::languages::{detect_language, is_indexable};
use crate::layout::RepoLayout;
use crate::store::{CodeStore, EmbeddedElement, vectorizable_elements};
use crate::summary::{ProjectSummary, generate_overview};

/// Per-repository indexing settings.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Hits fetched per review-context query.
    pub top_k: u64,
    /// Dependency files whose content is attached to a review context.
    pub max_dependency_files: usize,
    /// Files processed concurrently during a full pass.
    pub parallelism: usize,
    pub clone_retries: u32,
    pub clone_backoff: Duration,
    /// Clone URLs are `<remote_base>/<owner>/<name>.git`.
    pub remote_base: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            max_dependency_files: 5,
            parallelism: 1,
            clone_retries: 2,
            clone_backoff: Duration::from_secs(2),
            remote_base: "https://github.com".into(),
        }
    }
}

/// Summary of a full indexing run.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub checkout: Option<CheckoutStatus>,
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_removed: usize,
    pub elements: usize,
    pub vectors_written: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Lifecycle of one repository's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerState {
    Uninitialized,
    CheckedOut,
    Indexed,
    Ready,
}

/// Result of a single-file update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Content hash matches the stored record.
    Unchanged,
    Updated { elements: usize, vectors: usize },
    /// Not an analyzable file, or excluded.
    Ignored,
    /// The analyzer rejected the source; the previous record is kept.
    Skipped(String),
}

enum FileOutcome {
    Indexed { detail: FileDetail, vectors: usize },
    Skipped(String),
}

/// Indexes and serves one repository.
pub struct CodeAnalyzer<P> {
    pub(crate) engine: Engine<P>,
    pub(crate) layout: RepoLayout,
    pub(crate) config: IndexerConfig,
    pub(crate) index: Arc<IndexManager>,
    pub(crate) store: CodeStore,
    state: Mutex<AnalyzerState>,
    exclude: RwLock<Vec<String>>,
    files: RwLock<Arc<ProjectFiles>>,
    vector_size: OnceCell<u64>,
}

impl<P: LlmProvider + 'static> std::fmt::Debug for CodeAnalyzer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeAnalyzer")
            .field("repo", &self.layout.repo().full_name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<P: LlmProvider + 'static> CodeAnalyzer<P> {
    /// # Errors
    ///
    /// Returns an error if persisted index state cannot be loaded.
    pub fn new(engine: Engine<P>, layout: RepoLayout, config: IndexerConfig) -> Result<Self> {
        let index = Arc::new(IndexManager::open(&layout)?);
        let store = CodeStore::new(Arc::clone(&engine.store), layout.repo().collection_name());
        let exclude = read_json::<Vec<String>>(&layout.exclude_path())?.unwrap_or_default();

        let state = if index.exists() {
            AnalyzerState::Ready
        } else if layout.source_dir().is_dir() {
            AnalyzerState::CheckedOut
        } else {
            AnalyzerState::Uninitialized
        };

        let files = if layout.source_dir().is_dir() {
            scan_analyzable(layout.source_dir(), &exclude)
        } else {
            ProjectFiles::default()
        };

        Ok(Self {
            engine,
            layout,
            config,
            index,
            store,
            state: Mutex::new(state),
            exclude: RwLock::new(exclude),
            files: RwLock::new(Arc::new(files)),
            vector_size: OnceCell::new(),
        })
    }

    #[must_use]
    pub fn state(&self) -> AnalyzerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: AnalyzerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    #[must_use]
    pub fn layout(&self) -> &RepoLayout {
        &self.layout
    }

    #[must_use]
    pub fn index(&self) -> &IndexManager {
        &self.index
    }

    #[must_use]
    pub fn store(&self) -> &CodeStore {
        &self.store
    }

    #[must_use]
    pub fn exclude_dirs(&self) -> Vec<String> {
        self.exclude.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn is_excluded(&self, file: &str) -> bool {
        excluded(file, &self.exclude.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn project_files(&self) -> Arc<ProjectFiles> {
        Arc::clone(&self.files.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn update_project_files(&self, f: impl FnOnce(&mut ProjectFiles)) {
        let mut guard = self.files.write().unwrap_or_else(PoisonError::into_inner);
        f(Arc::make_mut(&mut guard));
    }

    /// Persist a new exclude list, or reload the saved one when `None`.
    fn update_exclude(&self, exclude_dirs: Option<Vec<String>>) -> Result<Vec<String>> {
        let list = if let Some(dirs) = exclude_dirs {
            let dirs: Vec<String> = dirs
                .into_iter()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect();
            write_json_atomic(&self.layout.exclude_path(), &dirs)?;
            dirs
        } else {
            read_json::<Vec<String>>(&self.layout.exclude_path())?.unwrap_or_default()
        };
        *self.exclude.write().unwrap_or_else(PoisonError::into_inner) = list.clone();
        Ok(list)
    }

    /// Embedding dimension, probed once from the provider.
    async fn vector_size(&self) -> Result<u64> {
        let size = self
            .vector_size
            .get_or_try_init(|| async {
                let probe = self.engine.embedder.embed("probe").await?;
                tracing::debug!(
                    provider = self.engine.embedder.provider().name(),
                    dimension = probe.len(),
                    "embedding dimension probed"
                );
                Ok::<u64, IndexError>(u64::try_from(probe.len())?)
            })
            .await?;
        Ok(*size)
    }

    async fn ensure_store(&self) -> Result<()> {
        let size = self.vector_size().await?;
        self.store.ensure_collection(size).await
    }

    /// Check out, wipe and rebuild the whole index.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkout fails, the vector collection cannot be
    /// prepared, or the index directory cannot be reset. Failures of
    /// individual files are collected in the report instead.
    pub async fn full_index(&self, exclude_dirs: Option<Vec<String>>) -> Result<IndexReport> {
        let start = Instant::now();
        let mut report = IndexReport::default();
        let repo = self.layout.repo().full_name();

        let exclude = self.update_exclude(exclude_dirs)?;

        let checkout = Checkout::new(
            self.layout.repo().clone_url(&self.config.remote_base),
            self.layout.source_dir(),
        )
        .with_retries(self.config.clone_retries)
        .with_backoff(self.config.clone_backoff);
        report.checkout = Some(checkout.ensure().await?);
        self.set_state(AnalyzerState::CheckedOut);

        self.ensure_store().await?;

        let previous: BTreeSet<String> = self
            .index
            .records()?
            .into_iter()
            .map(|r| r.file_name)
            .collect();
        tracing::info!(repo = %repo, "cleaning index");
        self.index.clean()?;

        let root = self.layout.source_dir().to_path_buf();
        let files = self
            .engine
            .pool
            .run(move || scan_analyzable(&root, &exclude))
            .await?;
        let files = Arc::new(files);
        *self.files.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&files);

        let total = files.len();
        report.files_scanned = total;
        tracing::info!(repo = %repo, total, "indexing started");

        let mut summary = ProjectSummary::default();
        let mut indexed = BTreeSet::new();
        let mut done = 0usize;

        let paths: Vec<String> = files.iter().cloned().collect();
        let mut results = futures::stream::iter(paths)
            .map(|rel| {
                let files = Arc::clone(&files);
                async move {
                    let outcome = self.index_file(&rel, files).await;
                    (rel, outcome)
                }
            })
            .buffer_unordered(self.config.parallelism.max(1));

        while let Some((rel, outcome)) = results.next().await {
            done += 1;
            match outcome {
                Ok(FileOutcome::Indexed { detail, vectors }) => {
                    tracing::info!(
                        file = %rel,
                        elements = detail.elements.len(),
                        vectors,
                        "indexed {done}/{total}"
                    );
                    report.files_indexed += 1;
                    report.elements += detail.elements.len();
                    report.vectors_written += vectors;
                    summary.record_file(&detail);
                    indexed.insert(rel);
                }
                Ok(FileOutcome::Skipped(reason)) => {
                    tracing::warn!(file = %rel, "skipped: {reason}");
                    report.files_skipped += 1;
                }
                Err(e) => {
                    tracing::error!(file = %rel, "indexing failed: {e:#}");
                    report.errors.push(format!("{rel}: {e:#}"));
                }
            }
        }
        drop(results);

        for gone in previous.difference(&indexed) {
            match self.store.delete_file(gone).await {
                Ok(()) => report.files_removed += 1,
                Err(e) => report.errors.push(format!("cleanup {gone}: {e:#}")),
            }
        }

        self.index.rebuild_structure(&indexed);
        self.index.save_structure()?;
        self.set_state(AnalyzerState::Indexed);

        self.write_summary(summary).await?;
        self.set_state(AnalyzerState::Ready);

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            repo = %repo,
            indexed = report.files_indexed,
            skipped = report.files_skipped,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "indexing finished"
        );
        Ok(report)
    }

    /// Read, analyze and record one file, then replace its vectors.
    async fn index_file(&self, rel: &str, files: Arc<ProjectFiles>) -> Result<FileOutcome> {
        let abs = self.layout.source_dir().join(rel);
        let registry = Arc::clone(&self.engine.analyzers);
        let rel_owned = rel.to_string();

        let analyzed = self
            .engine
            .pool
            .run(move || -> Result<Option<(FileDetail, DateTime<Utc>)>> {
                let bytes = std::fs::read(&abs)?;
                let modified = modified_time(&abs);
                let Ok(content) = String::from_utf8(bytes) else {
                    return Ok(None);
                };
                match analyze_source(&registry, &files, &rel_owned, &content) {
                    Ok(detail) => Ok(Some((detail, modified))),
                    Err(IndexError::Parse(msg)) => {
                        tracing::debug!(file = %rel_owned, "parse failed: {msg}");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
            .await??;

        let Some((detail, modified)) = analyzed else {
            return Ok(FileOutcome::Skipped("unparseable or not UTF-8".into()));
        };
        let vectors = self.record_and_store(&detail, modified).await?;
        Ok(FileOutcome::Indexed { detail, vectors })
    }

    /// Upsert the record, then replace the file's vectors. If the vectors
    /// cannot be written the record is removed again so the file stays stale.
    async fn record_and_store(&self, detail: &FileDetail, modified: DateTime<Utc>) -> Result<usize> {
        let index = Arc::clone(&self.index);
        let for_upsert = detail.clone();
        self.engine
            .pool
            .run(move || index.upsert(&for_upsert, modified))
            .await??;

        match self.write_vectors(detail).await {
            Ok(n) => Ok(n),
            Err(e) => {
                if let Err(rm) = self.index.remove(&detail.file_name) {
                    tracing::warn!(file = %detail.file_name, "record rollback failed: {rm:#}");
                }
                Err(e)
            }
        }
    }

    async fn write_vectors(&self, detail: &FileDetail) -> Result<usize> {
        let mut embedded = Vec::new();
        for element in vectorizable_elements(&detail.elements) {
            let vector = self.engine.embedder.embed(&element.content).await?;
            embedded.push(EmbeddedElement {
                element: element.clone(),
                vector,
            });
        }
        self.store
            .replace_file_vectors(&detail.file_name, detail.language, embedded)
            .await
    }

    async fn write_summary(&self, mut summary: ProjectSummary) -> Result<()> {
        let readme_path = self.layout.source_dir().join("README.md");
        summary.readme = match tokio::fs::read(&readme_path).await {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(_) => None,
        };
        summary.finalize();

        if summary.readme.is_some() {
            match generate_overview(self.engine.chat.as_ref(), &summary).await {
                Ok(overview) if !overview.is_empty() => summary.project_overview = Some(overview),
                Ok(_) => tracing::warn!("overview generation returned empty text"),
                Err(e) => tracing::warn!(
                    provider = self.engine.chat.name(),
                    "overview generation failed: {e:#}"
                ),
            }
        }

        write_json_atomic(&self.layout.summary_path(), &summary)?;
        let overview_path = self.layout.overview_path();
        match &summary.project_overview {
            Some(overview) => write_atomic(&overview_path, overview.as_bytes())?,
            None => match tokio::fs::remove_file(&overview_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }

    /// Re-index one file if its content changed since it was recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the record or vectors cannot be written.
    pub async fn incremental_update(&self, file: &str, content: &str) -> Result<UpdateOutcome> {
        let file = file.trim_start_matches("./");
        if detect_language(Path::new(file)).is_none() || self.is_excluded(file) {
            return Ok(UpdateOutcome::Ignored);
        }

        let hash = content_hash(content.as_bytes());
        if !self.index.is_stale(file, &hash) {
            tracing::debug!(file, "unchanged, skipping");
            return Ok(UpdateOutcome::Unchanged);
        }

        self.update_project_files(|files| files.insert(file.to_string()));
        let files = self.project_files();
        let registry = Arc::clone(&self.engine.analyzers);
        let rel = file.to_string();
        let source = content.to_string();
        let abs = self.layout.source_dir().join(file);

        let analyzed = self
            .engine
            .pool
            .run(move || {
                let modified = modified_time(&abs);
                analyze_source(&registry, &files, &rel, &source).map(|d| (d, modified))
            })
            .await?;

        let (detail, modified) = match analyzed {
            Ok(pair) => pair,
            Err(IndexError::Parse(msg)) => {
                tracing::warn!(file, "update skipped: {msg}");
                return Ok(UpdateOutcome::Skipped(msg));
            }
            Err(e) => return Err(e),
        };

        self.ensure_store().await?;
        let vectors = self.record_and_store(&detail, modified).await?;
        self.index.save_structure()?;
        self.set_state(AnalyzerState::Ready);

        tracing::info!(file, elements = detail.elements.len(), vectors, "file re-indexed");
        Ok(UpdateOutcome::Updated {
            elements: detail.elements.len(),
            vectors,
        })
    }

    /// Drop a deleted file from the records, the structure and the vectors.
    /// Returns whether a record existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the record or vectors cannot be removed.
    pub async fn remove_file(&self, file: &str) -> Result<bool> {
        let file = file.trim_start_matches("./");
        let existed = self.index.remove(file)?;
        self.update_project_files(|files| files.remove(file));
        if self.store.exists().await? {
            self.store.delete_file(file).await?;
        }
        if existed {
            self.index.save_structure()?;
            tracing::info!(file, "file removed from index");
        }
        Ok(existed)
    }
}

/// Analyze one source text into a [`FileDetail`].
///
/// # Errors
///
/// Returns [`IndexError::UnsupportedLanguage`] if no analyzer handles the
/// file, or [`IndexError::Parse`] if the analyzer rejects it.
pub fn analyze_source(
    registry: &AnalyzerRegistry,
    files: &ProjectFiles,
    rel: &str,
    content: &str,
) -> Result<FileDetail> {
    let lang = detect_language(Path::new(rel)).ok_or(IndexError::UnsupportedLanguage)?;
    let analyzer = registry.get(lang).ok_or(IndexError::UnsupportedLanguage)?;
    let elements = analyzer.extract_elements(rel, content)?;
    let dependencies = analyzer.extract_dependencies(rel, content, files)?;
    Ok(FileDetail {
        file_name: rel.to_string(),
        code_hash: content_hash(content.as_bytes()),
        language: lang,
        dependencies,
        elements,
    })
}

/// Analyzable project files under `root`, minus excluded paths.
fn scan_analyzable(root: &Path, exclude: &[String]) -> ProjectFiles {
    let all = ProjectFiles::scan(root);
    ProjectFiles::from_paths(
        all.iter()
            .filter(|p| is_indexable(Path::new(p.as_str())) && !excluded(p, exclude))
            .cloned(),
    )
}

fn excluded(file: &str, exclude: &[String]) -> bool {
    exclude.iter().any(|e| file.contains(e.as_str()))
}

fn modified_time(path: &Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_or_else(|_| Utc::now(), DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = IndexerConfig::default();
        assert_eq!(config.top_k, 20);
        assert_eq!(config.max_dependency_files, 5);
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.remote_base, "https://github.com");
    }

    #[test]
    fn index_report_defaults() {
        let report = IndexReport::default();
        assert_eq!(report.files_scanned, 0);
        assert!(report.checkout.is_none());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn exclusion_is_substring_match() {
        let exclude = vec!["third_party".to_string(), "tests/".to_string()];
        assert!(excluded("src/third_party/x.c", &exclude));
        assert!(excluded("tests/a.py", &exclude));
        assert!(!excluded("src/main.py", &exclude));
        assert!(!excluded("src/main.py", &[]));
    }

    #[test]
    fn scan_filters_language_and_exclusions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("vendor")).unwrap();
        std::fs::write(root.join("a.py"), "x = 1\n").unwrap();
        std::fs::write(root.join("notes.txt"), "hi\n").unwrap();
        std::fs::write(root.join("vendor/lib.c"), "int v;\n").unwrap();

        let files = scan_analyzable(root, &["vendor".to_string()]);
        assert!(files.contains("a.py"));
        assert!(!files.contains("notes.txt"));
        assert!(!files.contains("vendor/lib.c"));
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn analyze_source_builds_detail() {
        let registry = AnalyzerRegistry::default();
        let files = ProjectFiles::from_paths(["a.py", "b.py"]);
        let detail = analyze_source(&registry, &files, "a.py", "import b\ndef f():\n    pass\n").unwrap();
        assert_eq!(detail.language, crate::languages::Lang::Python);
        assert_eq!(detail.dependencies, BTreeSet::from(["b.py".to_string()]));
        assert_eq!(detail.elements.len(), 1);
        assert_eq!(detail.code_hash, content_hash(b"import b\ndef f():\n    pass\n"));
    }

    #[test]
    fn analyze_source_rejects_unknown_extension() {
        let registry = AnalyzerRegistry::default();
        let err = analyze_source(&registry, &ProjectFiles::default(), "x.rs", "fn main() {}")
            .unwrap_err();
        assert!(matches!(err, IndexError::UnsupportedLanguage));
    }
}
