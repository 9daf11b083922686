//! `coderev`: index a repository and assemble review context for patches.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use coderev_index::embedding::EmbeddingProvider;
use coderev_index::in_memory_store::InMemoryVectorStore;
use coderev_index::indexer::UpdateOutcome;
use coderev_index::layout::RepoName;
use coderev_index::pool::BlockingPool;
use coderev_index::qdrant::QdrantBackend;
use coderev_index::store::StoreClient;
use coderev_index::vector_store::VectorBackend;
use coderev_index::watcher::IndexWatcher;
use coderev_index::{CodeAnalyzer, Engine, can_use};
use coderev_llm::any::AnyProvider;
use coderev_llm::ollama::OllamaProvider;

use crate::config::{Config, ProviderKind, VectorBackendKind};

#[derive(Parser)]
#[command(name = "coderev", version, about = "Incremental code index and review-context retrieval")]
struct Cli {
    /// Configuration file (TOML). Defaults to `$CODEREV_CONFIG`, then
    /// `config/default.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check out the repository and rebuild its whole index.
    Index {
        /// `owner/name` or a clone URL.
        repo: String,
        /// Paths containing any of these substrings are skipped. Persisted for
        /// later runs; omit to reuse the saved list.
        #[arg(long = "exclude", value_delimiter = ',')]
        exclude: Option<Vec<String>>,
    },
    /// Re-index one file from the checkout if it changed.
    Update { repo: String, file: String },
    /// Drop one file from the index.
    Remove { repo: String, file: String },
    /// Print the review context for a patch as JSON.
    Context {
        repo: String,
        /// Project-relative path of the patched file.
        file: String,
        /// File holding the patch text; `-` reads stdin.
        #[arg(long, default_value = "-")]
        patch: PathBuf,
        /// Also print the definitions the patch touches.
        #[arg(long)]
        definitions: bool,
    },
    /// Show whether an index exists and how large it is.
    Status { repo: String },
    /// Keep the index current while files in the checkout change.
    Watch { repo: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);
    let config = Config::load(&config_path)?;
    config.validate()?;

    match cli.command {
        Command::Index { repo, exclude } => {
            let analyzer = open_analyzer(&config, &repo)?;
            let report = analyzer.full_index(exclude).await?;
            println!(
                "indexed {}/{} files ({} skipped, {} errors), {} elements, {} vectors in {} ms",
                report.files_indexed,
                report.files_scanned,
                report.files_skipped,
                report.errors.len(),
                report.elements,
                report.vectors_written,
                report.duration_ms,
            );
            for err in &report.errors {
                eprintln!("  {err}");
            }
        }
        Command::Update { repo, file } => {
            let analyzer = open_analyzer(&config, &repo)?;
            let path = analyzer.layout().source_dir().join(&file);
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            match analyzer.incremental_update(&file, &content).await? {
                UpdateOutcome::Unchanged => println!("{file}: unchanged"),
                UpdateOutcome::Updated { elements, vectors } => {
                    println!("{file}: {elements} elements, {vectors} vectors");
                }
                UpdateOutcome::Ignored => println!("{file}: not indexed (language or exclude list)"),
                UpdateOutcome::Skipped(reason) => println!("{file}: skipped, {reason}"),
            }
        }
        Command::Remove { repo, file } => {
            let analyzer = open_analyzer(&config, &repo)?;
            if analyzer.remove_file(&file).await? {
                println!("{file}: removed");
            } else {
                println!("{file}: was not indexed");
            }
        }
        Command::Context {
            repo,
            file,
            patch,
            definitions,
        } => {
            let analyzer = open_analyzer(&config, &repo)?;
            let patch = read_patch(&patch).await?;
            let context = analyzer.get_review_context(&file, &patch).await;
            let mut out = serde_json::to_value(&context)?;
            if definitions {
                let defs = analyzer.patch_definitions(&file, &patch).await?;
                out["definitions"] = serde_json::to_value(defs)?;
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Status { repo } => {
            let name: RepoName = repo.parse()?;
            if !can_use(&config.storage.data_dir, &name) {
                println!("{name}: not indexed");
                return Ok(());
            }
            let analyzer = open_analyzer(&config, &repo)?;
            let records = analyzer.index().records()?.len();
            let vectors = if analyzer.store().exists().await? {
                analyzer.store().count().await?
            } else {
                0
            };
            println!("{name}: {records} files, {vectors} vectors ({:?})", analyzer.state());
        }
        Command::Watch { repo } => {
            let analyzer = Arc::new(open_analyzer(&config, &repo)?);
            let watcher = IndexWatcher::start(Arc::clone(&analyzer), config.watch_debounce())?;
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            watcher.stop();
        }
    }
    Ok(())
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("CODEREV_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

fn open_analyzer(config: &Config, repo: &str) -> anyhow::Result<CodeAnalyzer<AnyProvider>> {
    let name: RepoName = repo.parse()?;
    let engine = build_engine(config)?;
    Ok(engine.analyzer(name, config.indexer_config())?)
}

fn build_engine(config: &Config) -> anyhow::Result<Engine<AnyProvider>> {
    let embedder = EmbeddingProvider::new(create_provider(config, config.embedding.provider)?)
        .with_chunk_words(config.embedding.chunk_words);
    let chat = create_provider(config, config.llm.provider)?;

    let backend: Arc<dyn VectorBackend> = match config.vector_store.backend {
        VectorBackendKind::Qdrant => Arc::new(QdrantBackend::new(&config.vector_store.url)?),
        VectorBackendKind::Memory => {
            tracing::warn!("in-memory vector store: vectors are lost on exit");
            Arc::new(InMemoryVectorStore::new())
        }
    };

    Ok(Engine::new(
        &config.storage.data_dir,
        embedder,
        chat,
        Arc::new(StoreClient::new(backend)),
        BlockingPool::new(config.index.blocking_threads),
    ))
}

fn create_provider(config: &Config, kind: ProviderKind) -> anyhow::Result<AnyProvider> {
    match kind {
        ProviderKind::Ollama => Ok(AnyProvider::Ollama(OllamaProvider::new(
            &config.llm.base_url,
            config.llm.model.clone(),
            config.llm.embedding_model.clone(),
        ))),
        #[cfg(feature = "candle")]
        ProviderKind::Candle => {
            use coderev_llm::candle_provider::CandleProvider;
            Ok(AnyProvider::Candle(CandleProvider::new(
                config.embedding.model.clone(),
                select_device()?,
            )))
        }
        #[cfg(not(feature = "candle"))]
        ProviderKind::Candle => anyhow::bail!("candle provider requires the `candle` feature"),
        #[cfg(feature = "mock")]
        ProviderKind::Mock => Ok(AnyProvider::Mock(coderev_llm::mock::MockProvider::default())),
        #[cfg(not(feature = "mock"))]
        ProviderKind::Mock => anyhow::bail!("mock provider requires the `mock` feature"),
    }
}

#[cfg(feature = "candle")]
fn select_device() -> anyhow::Result<coderev_llm::candle_provider::Device> {
    use coderev_llm::candle_provider::Device;

    #[cfg(feature = "metal")]
    {
        return Ok(Device::new_metal(0)?);
    }
    #[cfg(all(feature = "cuda", not(feature = "metal")))]
    {
        return Ok(Device::new_cuda(0)?);
    }
    #[allow(unreachable_code)]
    Ok(Device::Cpu)
}

async fn read_patch(path: &std::path::Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        use tokio::io::AsyncReadExt;
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("failed to read patch from stdin")?;
        return Ok(buf);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read patch {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_index_with_exclusions() {
        let cli = Cli::try_parse_from([
            "coderev",
            "index",
            "acme/widgets",
            "--exclude",
            "vendor,third_party",
        ])
        .unwrap();
        match cli.command {
            Command::Index { repo, exclude } => {
                assert_eq!(repo, "acme/widgets");
                assert_eq!(exclude.unwrap(), vec!["vendor", "third_party"]);
            }
            _ => panic!("expected index"),
        }
    }

    #[test]
    fn cli_index_without_exclusions_reuses_saved_list() {
        let cli = Cli::try_parse_from(["coderev", "index", "acme/widgets"]).unwrap();
        assert!(matches!(cli.command, Command::Index { exclude: None, .. }));
    }

    #[test]
    fn cli_context_defaults_to_stdin() {
        let cli = Cli::try_parse_from(["coderev", "context", "acme/widgets", "src/a.py"]).unwrap();
        match cli.command {
            Command::Context { patch, definitions, .. } => {
                assert_eq!(patch, PathBuf::from("-"));
                assert!(!definitions);
            }
            _ => panic!("expected context"),
        }
    }

    #[test]
    fn explicit_config_flag_wins() {
        let path = resolve_config_path(Some(PathBuf::from("/etc/coderev.toml")));
        assert_eq!(path, PathBuf::from("/etc/coderev.toml"));
    }

    #[test]
    fn memory_backend_engine_builds() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.vector_store.backend = VectorBackendKind::Memory;
        let engine = build_engine(&config).unwrap();
        assert_eq!(engine.data_dir(), dir.path());
    }
}
