//! Review-context assembly for a single patch.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::Path;

use coderev_llm::LlmProvider;
use serde::Serialize;

use crate::analyzer::ElementKind;
use crate::error::Result;
use crate::indexer::CodeAnalyzer;
use crate::languages::detect_language;
use crate::layout::{RepoLayout, RepoName};
use crate::vector_store::ScoredRecord;

/// Related elements of one file, grouped by element type then name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileContext {
    pub language: String,
    #[serde(flatten)]
    pub elements: BTreeMap<String, BTreeMap<String, String>>,
}

/// Everything attached to a review request. Empty when the repository has no
/// index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReviewContext {
    pub context_info: BTreeMap<String, FileContext>,
    /// Dependency path to full file content.
    pub dependencies: BTreeMap<String, String>,
    pub overview: String,
}

impl ReviewContext {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.context_info.is_empty() && self.dependencies.is_empty() && self.overview.is_empty()
    }

    /// Every file entry carries a (possibly empty) map for each element type.
    fn add_hit(&mut self, hit: ScoredRecord) {
        let record = hit.record;
        let file = self
            .context_info
            .entry(record.file_path)
            .or_insert_with(|| FileContext {
                language: record.language,
                elements: ElementKind::ALL
                    .into_iter()
                    .map(|kind| (kind.as_str().to_string(), BTreeMap::new()))
                    .collect(),
            });
        file.elements
            .entry(record.element_type)
            .or_default()
            .insert(record.element_name, record.content);
    }
}

/// Whether an index has been written for `repo` under `data_dir`.
#[must_use]
pub fn can_use(data_dir: &Path, repo: &RepoName) -> bool {
    RepoLayout::new(data_dir, repo.clone()).records_dir().is_dir()
}

impl<P: LlmProvider + 'static> CodeAnalyzer<P> {
    /// Assemble the context for reviewing `patch` against `filename`.
    ///
    /// Never fails: a missing index yields an empty context, and a failing
    /// search or unreadable file only drops that part of the bundle.
    pub async fn get_review_context(&self, filename: &str, patch: &str) -> ReviewContext {
        let mut ctx = ReviewContext::default();
        if !self.index.exists() {
            tracing::debug!(repo = %self.layout.repo(), "no index, empty review context");
            return ctx;
        }
        let filename = filename.trim_start_matches("./");

        match self.related_elements(patch).await {
            Ok(hits) => {
                for hit in hits {
                    ctx.add_hit(hit);
                }
            }
            Err(e) => tracing::warn!(file = filename, "similarity search failed: {e:#}"),
        }

        ctx.dependencies = self.dependency_contents(filename).await;

        match tokio::fs::read_to_string(self.layout.overview_path()).await {
            Ok(text) => ctx.overview = text,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("overview unreadable: {e}"),
        }
        ctx
    }

    async fn related_elements(&self, patch: &str) -> Result<Vec<ScoredRecord>> {
        if !self.store.exists().await? {
            return Ok(Vec::new());
        }
        let vector = self.engine.embedder.embed(patch).await?;
        self.store.search(vector, self.config.top_k).await
    }

    /// Content of the first few recorded dependencies that still exist on disk.
    async fn dependency_contents(&self, filename: &str) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let record = match self.index.get(filename) {
            Ok(Some(record)) => record,
            Ok(None) => return out,
            Err(e) => {
                tracing::warn!(file = filename, "index record unreadable: {e:#}");
                return out;
            }
        };

        for dep in record.dependencies {
            if out.len() >= self.config.max_dependency_files {
                break;
            }
            match tokio::fs::read(self.layout.source_dir().join(&dep)).await {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        out.insert(dep, text);
                    }
                    Err(_) => tracing::debug!(file = %dep, "dependency is not UTF-8"),
                },
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(file = %dep, "dependency unreadable: {e}"),
            }
        }
        out
    }

    /// Definitions in `filename` of the functions and variables the patch
    /// touches, keyed by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists in the checkout but cannot be read.
    pub async fn patch_definitions(
        &self,
        filename: &str,
        patch: &str,
    ) -> Result<BTreeMap<String, String>> {
        let filename = filename.trim_start_matches("./");
        let Some(analyzer) = detect_language(Path::new(filename)).and_then(|l| self.engine.analyzers.get(l))
        else {
            return Ok(BTreeMap::new());
        };

        let source = match tokio::fs::read(self.layout.source_dir().join(filename)).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let patch = patch.to_string();

        self.engine
            .pool
            .run(move || {
                let names: BTreeSet<String> = analyzer.extract_patch_names(&patch).all();
                if names.is_empty() {
                    return BTreeMap::new();
                }
                analyzer.extract_definitions(&source, &names)
            })
            .await
    }
}
