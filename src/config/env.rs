use super::Config;

fn parse_kind<T: serde::de::DeserializeOwned>(key: &str, v: String) -> Option<T> {
    if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
        Some(kind)
    } else {
        tracing::warn!("ignoring invalid {key} value: {v}");
        None
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CODEREV_DATA_DIR") {
            self.storage.data_dir = v.into();
        }
        if let Ok(v) = std::env::var("CODEREV_LLM_PROVIDER")
            && let Some(kind) = parse_kind("CODEREV_LLM_PROVIDER", v)
        {
            self.llm.provider = kind;
        }
        if let Ok(v) = std::env::var("CODEREV_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("CODEREV_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("CODEREV_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("CODEREV_EMBEDDING_PROVIDER")
            && let Some(kind) = parse_kind("CODEREV_EMBEDDING_PROVIDER", v)
        {
            self.embedding.provider = kind;
        }
        if let Ok(v) = std::env::var("CODEREV_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("CODEREV_EMBEDDING_CHUNK_WORDS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.embedding.chunk_words = n;
        }
        if let Ok(v) = std::env::var("CODEREV_VECTOR_BACKEND")
            && let Some(kind) = parse_kind("CODEREV_VECTOR_BACKEND", v)
        {
            self.vector_store.backend = kind;
        }
        if let Ok(v) = std::env::var("CODEREV_QDRANT_URL") {
            self.vector_store.url = v;
        }
        self.apply_env_overrides_index();
    }

    fn apply_env_overrides_index(&mut self) {
        if let Ok(v) = std::env::var("CODEREV_INDEX_TOP_K")
            && let Ok(k) = v.parse::<u64>()
        {
            self.index.top_k = k;
        }
        if let Ok(v) = std::env::var("CODEREV_INDEX_MAX_DEPENDENCY_FILES")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.max_dependency_files = n;
        }
        if let Ok(v) = std::env::var("CODEREV_INDEX_PARALLELISM")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.parallelism = n;
        }
        if let Ok(v) = std::env::var("CODEREV_INDEX_BLOCKING_THREADS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.blocking_threads = n;
        }
        if let Ok(v) = std::env::var("CODEREV_INDEX_CLONE_RETRIES")
            && let Ok(n) = v.parse::<u32>()
        {
            self.index.clone_retries = n;
        }
        if let Ok(v) = std::env::var("CODEREV_INDEX_REMOTE_BASE") {
            self.index.remote_base = v;
        }
        if let Ok(v) = std::env::var("CODEREV_INDEX_WATCH_DEBOUNCE_MS")
            && let Ok(ms) = v.parse::<u64>()
        {
            self.index.watch_debounce_ms = ms;
        }
    }
}
