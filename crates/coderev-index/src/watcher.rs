//! Debounced filesystem watcher that keeps the index current.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use coderev_llm::LlmProvider;
use notify_debouncer_mini::{DebouncedEvent, DebouncedEventKind, new_debouncer};
use tokio::sync::mpsc;

use crate::analyzer::resolve::relative_path;
use crate::error::Result;
use crate::indexer::CodeAnalyzer;
use crate::languages::is_indexable;

pub struct IndexWatcher {
    handle: tokio::task::JoinHandle<()>,
}

impl IndexWatcher {
    /// Watch the analyzer's checkout. Changed files are re-indexed, deleted
    /// files are dropped from the index.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem watcher cannot be initialized.
    pub fn start<P: LlmProvider + 'static>(
        analyzer: Arc<CodeAnalyzer<P>>,
        debounce: Duration,
    ) -> Result<Self> {
        let root = analyzer.layout().source_dir().to_path_buf();
        let (notify_tx, mut notify_rx) = mpsc::channel::<PathBuf>(64);

        let mut debouncer = new_debouncer(
            debounce,
            move |events: std::result::Result<Vec<DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!("index watcher error: {e}");
                        return;
                    }
                };

                forward_changes(events, &notify_tx);
            },
        )?;

        debouncer
            .watcher()
            .watch(&root, notify::RecursiveMode::Recursive)?;
        tracing::info!(root = %root.display(), "watching for changes");

        let handle = tokio::spawn(async move {
            let _debouncer = debouncer;
            while let Some(path) = notify_rx.recv().await {
                let Some(rel) = relative_path(&root, &path) else {
                    continue;
                };
                if let Err(e) = sync_file(&analyzer, &path, &rel).await {
                    tracing::warn!(file = %rel, "watch update failed: {e:#}");
                }
            }
        });

        Ok(Self { handle })
    }

    /// Stop watching and drop the debouncer.
    pub fn stop(self) {
        self.handle.abort();
    }
}

/// Queue indexable changed paths. Returns `false` once the receiving task is
/// gone.
fn forward_changes(events: Vec<DebouncedEvent>, tx: &mpsc::Sender<PathBuf>) -> bool {
    let paths: HashSet<PathBuf> = events
        .into_iter()
        .filter(|e| e.kind == DebouncedEventKind::Any && is_indexable(&e.path))
        .map(|e| e.path)
        .collect();

    for path in paths {
        if let Err(e) = tx.blocking_send(path) {
            tracing::warn!(path = %e.0.display(), "index watcher stopped, change dropped");
            return false;
        }
    }
    true
}

async fn sync_file<P: LlmProvider + 'static>(
    analyzer: &CodeAnalyzer<P>,
    path: &std::path::Path,
    rel: &str,
) -> Result<()> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let Ok(content) = String::from_utf8(bytes) else {
                tracing::debug!(file = rel, "not UTF-8, ignored");
                return Ok(());
            };
            analyzer.incremental_update(rel, &content).await?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            analyzer.remove_file(rel).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use coderev_llm::mock::MockProvider;

    use super::*;
    use crate::embedding::EmbeddingProvider;
    use crate::engine::Engine;
    use crate::in_memory_store::InMemoryVectorStore;
    use crate::indexer::IndexerConfig;
    use crate::layout::{RepoLayout, RepoName};
    use crate::pool::BlockingPool;
    use crate::store::StoreClient;

    fn analyzer(data: &std::path::Path, source: &std::path::Path) -> Arc<CodeAnalyzer<MockProvider>> {
        let mock = MockProvider::default();
        let engine = Engine::new(
            data,
            EmbeddingProvider::new(mock.clone()),
            mock,
            Arc::new(StoreClient::new(Arc::new(InMemoryVectorStore::new()))),
            BlockingPool::new(2),
        );
        let layout = RepoLayout::new(data, RepoName::new("acme", "widgets").unwrap())
            .with_source_dir(source.to_path_buf());
        Arc::new(CodeAnalyzer::new(engine, layout, IndexerConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn start_with_valid_directory() {
        let data = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let watcher = IndexWatcher::start(analyzer(data.path(), source.path()), Duration::from_millis(50));
        assert!(watcher.is_ok());
        watcher.unwrap().stop();
    }

    #[tokio::test]
    async fn start_with_nonexistent_directory_fails() {
        let data = tempfile::tempdir().unwrap();
        let missing = data.path().join("nonexistent");
        let result = IndexWatcher::start(analyzer(data.path(), &missing), Duration::from_millis(50));
        assert!(result.is_err());
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn changes_are_forwarded_until_receiver_closes() {
        let events = || {
            vec![
                DebouncedEvent::new(PathBuf::from("/src/a.py"), DebouncedEventKind::Any),
                DebouncedEvent::new(PathBuf::from("/src/a.py"), DebouncedEventKind::Any),
                DebouncedEvent::new(PathBuf::from("/src/notes.md"), DebouncedEventKind::Any),
            ]
        };

        let (tx, mut rx) = mpsc::channel(8);
        assert!(forward_changes(events(), &tx));
        assert_eq!(rx.try_recv().unwrap(), PathBuf::from("/src/a.py"));
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!forward_changes(events(), &tx));
    }

    #[cfg(feature = "lang-python")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sync_file_indexes_then_removes() {
        let data = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let analyzer = analyzer(data.path(), source.path());
        let path = source.path().join("a.py");
        std::fs::write(&path, "def f():\n    return 1\n").unwrap();

        sync_file(&analyzer, &path, "a.py").await.unwrap();
        assert!(analyzer.index().get("a.py").unwrap().is_some());

        std::fs::remove_file(&path).unwrap();
        sync_file(&analyzer, &path, "a.py").await.unwrap();
        assert!(analyzer.index().get("a.py").unwrap().is_none());
        assert_eq!(analyzer.store().count().await.unwrap(), 0);
    }
}
