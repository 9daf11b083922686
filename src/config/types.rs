use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Backend selector shared by the chat and embedding providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    Candle,
    Mock,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Candle => "candle",
            Self::Mock => "mock",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "mistral:7b".into()
}

fn default_embedding_model() -> String {
    "qwen3-embedding".into()
}

/// Chat model used for the project overview.
#[derive(Debug, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

fn default_provider() -> ProviderKind {
    ProviderKind::Ollama
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
        }
    }
}

fn default_chunk_words() -> usize {
    1000
}

fn default_candle_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    /// Hugging Face repository of the local model when `provider = "candle"`.
    #[serde(default = "default_candle_model")]
    pub model: String,
    /// Inputs longer than this many words are embedded chunk by chunk and
    /// mean-pooled.
    #[serde(default = "default_chunk_words")]
    pub chunk_words: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_candle_model(),
            chunk_words: default_chunk_words(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackendKind {
    Qdrant,
    Memory,
}

fn default_vector_backend() -> VectorBackendKind {
    VectorBackendKind::Qdrant
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_vector_backend")]
    pub backend: VectorBackendKind,
    #[serde(default = "default_qdrant_url")]
    pub url: String,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            url: default_qdrant_url(),
        }
    }
}

fn default_top_k() -> u64 {
    20
}

fn default_max_dependency_files() -> usize {
    5
}

fn default_parallelism() -> usize {
    1
}

fn default_blocking_threads() -> usize {
    4
}

fn default_clone_retries() -> u32 {
    2
}

fn default_remote_base() -> String {
    "https://github.com".into()
}

fn default_watch_debounce_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default = "default_top_k")]
    pub top_k: u64,
    #[serde(default = "default_max_dependency_files")]
    pub max_dependency_files: usize,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_blocking_threads")]
    pub blocking_threads: usize,
    #[serde(default = "default_clone_retries")]
    pub clone_retries: u32,
    #[serde(default = "default_remote_base")]
    pub remote_base: String,
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_dependency_files: default_max_dependency_files(),
            parallelism: default_parallelism(),
            blocking_threads: default_blocking_threads(),
            clone_retries: default_clone_retries(),
            remote_base: default_remote_base(),
            watch_debounce_ms: default_watch_debounce_ms(),
        }
    }
}
