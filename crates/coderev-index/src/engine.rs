//! Process-wide services shared by every repository analyzer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use coderev_llm::LlmProvider;

use crate::analyzer::AnalyzerRegistry;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::indexer::{CodeAnalyzer, IndexerConfig};
use crate::layout::{RepoLayout, RepoName};
use crate::pool::BlockingPool;
use crate::store::StoreClient;

/// Built once at start-up and cloned into each [`CodeAnalyzer`]. All members
/// are shared handles.
pub struct Engine<P> {
    pub(crate) data_dir: PathBuf,
    pub(crate) embedder: Arc<EmbeddingProvider<P>>,
    pub(crate) chat: Arc<P>,
    pub(crate) store: Arc<StoreClient>,
    pub(crate) pool: BlockingPool,
    pub(crate) analyzers: Arc<AnalyzerRegistry>,
}

impl<P> Clone for Engine<P> {
    fn clone(&self) -> Self {
        Self {
            data_dir: self.data_dir.clone(),
            embedder: Arc::clone(&self.embedder),
            chat: Arc::clone(&self.chat),
            store: Arc::clone(&self.store),
            pool: self.pool.clone(),
            analyzers: Arc::clone(&self.analyzers),
        }
    }
}

impl<P> std::fmt::Debug for Engine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("data_dir", &self.data_dir)
            .field("pool_size", &self.pool.size())
            .finish_non_exhaustive()
    }
}

impl<P: LlmProvider + 'static> Engine<P> {
    #[must_use]
    pub fn new(
        data_dir: impl Into<PathBuf>,
        embedder: EmbeddingProvider<P>,
        chat: P,
        store: Arc<StoreClient>,
        pool: BlockingPool,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            embedder: Arc::new(embedder),
            chat: Arc::new(chat),
            store,
            pool,
            analyzers: Arc::new(AnalyzerRegistry::default()),
        }
    }

    #[must_use]
    pub fn with_analyzers(mut self, analyzers: AnalyzerRegistry) -> Self {
        self.analyzers = Arc::new(analyzers);
        self
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[must_use]
    pub fn layout(&self, repo: RepoName) -> RepoLayout {
        RepoLayout::new(&self.data_dir, repo)
    }

    /// Open the analyzer for `repo` with the default layout.
    ///
    /// # Errors
    ///
    /// Returns an error if persisted index state cannot be loaded.
    pub fn analyzer(&self, repo: RepoName, config: IndexerConfig) -> Result<CodeAnalyzer<P>> {
        CodeAnalyzer::new(self.clone(), self.layout(repo), config)
    }
}
