use std::io::Write;
use std::path::PathBuf;

use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 17] = [
    "CODEREV_DATA_DIR",
    "CODEREV_LLM_PROVIDER",
    "CODEREV_LLM_BASE_URL",
    "CODEREV_LLM_MODEL",
    "CODEREV_LLM_EMBEDDING_MODEL",
    "CODEREV_EMBEDDING_PROVIDER",
    "CODEREV_EMBEDDING_MODEL",
    "CODEREV_EMBEDDING_CHUNK_WORDS",
    "CODEREV_VECTOR_BACKEND",
    "CODEREV_QDRANT_URL",
    "CODEREV_INDEX_TOP_K",
    "CODEREV_INDEX_MAX_DEPENDENCY_FILES",
    "CODEREV_INDEX_PARALLELISM",
    "CODEREV_INDEX_BLOCKING_THREADS",
    "CODEREV_INDEX_CLONE_RETRIES",
    "CODEREV_INDEX_REMOTE_BASE",
    "CODEREV_INDEX_WATCH_DEBOUNCE_MS",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

#[test]
fn defaults_when_file_missing() {
    let config = Config::default();
    assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
    assert_eq!(config.llm.provider, ProviderKind::Ollama);
    assert_eq!(config.llm.base_url, "http://localhost:11434");
    assert_eq!(config.embedding.chunk_words, 1000);
    assert_eq!(config.vector_store.backend, VectorBackendKind::Qdrant);
    assert_eq!(config.vector_store.url, "http://localhost:6334");
    assert_eq!(config.index.top_k, 20);
    assert_eq!(config.index.max_dependency_files, 5);
    assert_eq!(config.index.parallelism, 1);
    assert_eq!(config.index.blocking_threads, 4);
    assert_eq!(config.index.remote_base, "https://github.com");
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn load_missing_file_uses_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.index.top_k, 20);
}

#[test]
#[serial]
fn parse_valid_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(
        f,
        r#"
[storage]
data_dir = "/var/lib/coderev"

[embedding]
provider = "mock"
chunk_words = 256

[vector_store]
backend = "memory"

[index]
top_k = 8
parallelism = 4
"#
    )
    .unwrap();

    clear_env();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/coderev"));
    assert_eq!(config.embedding.provider, ProviderKind::Mock);
    assert_eq!(config.embedding.chunk_words, 256);
    assert_eq!(config.vector_store.backend, VectorBackendKind::Memory);
    assert_eq!(config.index.top_k, 8);
    assert_eq!(config.index.parallelism, 4);
    assert_eq!(config.index.max_dependency_files, 5);
    assert_eq!(config.llm.model, "mistral:7b");
}

#[test]
#[serial]
fn invalid_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[index\ntop_k = ").unwrap();
    clear_env();
    assert!(Config::load(&path).is_err());
}

#[test]
#[serial]
fn env_overrides() {
    clear_env();
    let mut config = Config::default();

    unsafe {
        std::env::set_var("CODEREV_INDEX_TOP_K", "5");
        std::env::set_var("CODEREV_VECTOR_BACKEND", "memory");
        std::env::set_var("CODEREV_DATA_DIR", "/tmp/cr");
    }
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.index.top_k, 5);
    assert_eq!(config.vector_store.backend, VectorBackendKind::Memory);
    assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/cr"));
}

#[test]
#[serial]
fn invalid_env_values_are_ignored() {
    clear_env();
    let mut config = Config::default();

    unsafe {
        std::env::set_var("CODEREV_INDEX_TOP_K", "many");
        std::env::set_var("CODEREV_LLM_PROVIDER", "gpt");
    }
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.index.top_k, 20);
    assert_eq!(config.llm.provider, ProviderKind::Ollama);
}

#[test]
fn validate_rejects_zero_values() {
    let mut config = Config::default();
    config.index.top_k = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.embedding.chunk_words = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.index.blocking_threads = 0;
    assert!(config.validate().is_err());
}

#[test]
fn indexer_config_carries_index_section() {
    let mut config = Config::default();
    config.index.top_k = 3;
    config.index.remote_base = "https://git.example".into();
    let ic = config.indexer_config();
    assert_eq!(ic.top_k, 3);
    assert_eq!(ic.remote_base, "https://git.example");
    assert_eq!(ic.max_dependency_files, 5);
}
