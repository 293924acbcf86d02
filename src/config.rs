use crate::document::JsonMapping;
use crate::error::{Error, Result};
use crate::index::{BuildOptions, IndexExpectation};
use crate::llm::GenerationOptions;
use crate::ollama::OllamaConfig;
use crate::rag::{EngineConfig, MemoryConfig};
use crate::similarity::DistanceMetric;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// What to do with a snapshot that is already on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexPolicy {
    /// Load it without looking at the corpus
    #[default]
    Reuse,
    /// Load it only if its fingerprint matches the current corpus
    RebuildIfStale,
    /// Always rebuild from the corpus
    AlwaysRebuild,
}

impl FromStr for IndexPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reuse" => Ok(IndexPolicy::Reuse),
            "rebuild-if-stale" | "stale" => Ok(IndexPolicy::RebuildIfStale),
            "always-rebuild" | "rebuild" => Ok(IndexPolicy::AlwaysRebuild),
            other => Err(Error::Configuration(format!(
                "unknown index policy '{}'",
                other
            ))),
        }
    }
}

/// Every setting of the pipeline, with defaults
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub corpus_dir: PathBuf,
    pub index_dir: PathBuf,
    pub index_policy: IndexPolicy,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub metric: DistanceMetric,
    pub memory: MemoryConfig,
    pub embedding_model: String,
    /// Vector length of the embedding model, if known; checked when loading
    pub embedding_dimension: Option<usize>,
    pub llm_model: String,
    pub generation: GenerationOptions,
    pub ollama_url: String,
    pub request_timeout: Duration,
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
    pub json_mapping: JsonMapping,
}

impl Default for RagConfig {
    fn default() -> Self {
        RagConfig {
            corpus_dir: PathBuf::from("data"),
            index_dir: PathBuf::from("rag_index"),
            index_policy: IndexPolicy::Reuse,
            chunk_size: 200,
            chunk_overlap: 20,
            top_k: 4,
            metric: DistanceMetric::Cosine,
            memory: MemoryConfig::default(),
            embedding_model: "deepseek-r1:1.5b".to_string(),
            embedding_dimension: None,
            llm_model: "deepseek-r1:1.5b".to_string(),
            generation: GenerationOptions::default(),
            ollama_url: "http://localhost:11434".to_string(),
            request_timeout: Duration::from_secs(120),
            embed_batch_size: 16,
            embed_concurrency: 4,
            json_mapping: JsonMapping::default(),
        }
    }
}

impl RagConfig {
    /// Defaults overridden by `RAG_*` / `OLLAMA_URL` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = RagConfig::default();

        if let Some(v) = env_var("RAG_CORPUS_DIR") {
            config.corpus_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("RAG_INDEX_DIR") {
            config.index_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse("RAG_INDEX_POLICY")? {
            config.index_policy = v;
        }
        if let Some(v) = env_parse("RAG_CHUNK_SIZE")? {
            config.chunk_size = v;
        }
        if let Some(v) = env_parse("RAG_CHUNK_OVERLAP")? {
            config.chunk_overlap = v;
        }
        if let Some(v) = env_parse("RAG_TOP_K")? {
            config.top_k = v;
        }
        if let Some(v) = env_parse("RAG_DISTANCE")? {
            config.metric = v;
        }
        if let Some(v) = env_parse("RAG_MEMORY")? {
            config.memory.enabled = v;
        }
        if let Some(v) = env_parse("RAG_MEMORY_WINDOW")? {
            config.memory.window = Some(v);
        }
        if let Some(v) = env_var("RAG_EMBEDDING_MODEL") {
            config.embedding_model = v;
        }
        if let Some(v) = env_parse("RAG_EMBEDDING_DIMENSION")? {
            config.embedding_dimension = Some(v);
        }
        if let Some(v) = env_var("RAG_LLM_MODEL") {
            config.llm_model = v;
        }
        if let Some(v) = env_parse("RAG_TEMPERATURE")? {
            config.generation.temperature = Some(v);
        }
        if let Some(v) = env_var("OLLAMA_URL") {
            config.ollama_url = v;
        }
        if let Some(v) = env_parse("RAG_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse("RAG_EMBED_BATCH_SIZE")? {
            config.embed_batch_size = v;
        }
        if let Some(v) = env_parse("RAG_EMBED_CONCURRENCY")? {
            config.embed_concurrency = v;
        }
        if let Some(v) = env_var("RAG_JSON_CONTENT_FIELD") {
            config.json_mapping.content_field = v;
        }
        if let Some(v) = env_var("RAG_JSON_SOURCE_FIELD") {
            config.json_mapping.source_field = v;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Configuration("chunk_size must be greater than 0".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(Error::Configuration("top_k must be greater than 0".to_string()));
        }
        if self.embed_batch_size == 0 || self.embed_concurrency == 0 {
            return Err(Error::Configuration(
                "embedding batch size and concurrency must be greater than 0".to_string(),
            ));
        }
        if self.embedding_model.trim().is_empty() || self.llm_model.trim().is_empty() {
            return Err(Error::Configuration("model identifiers must not be empty".to_string()));
        }
        if self.json_mapping.content_field.trim().is_empty() {
            return Err(Error::Configuration("JSON content field must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            top_k: self.top_k,
            memory: self.memory.clone(),
        }
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            batch_size: self.embed_batch_size,
            concurrency: self.embed_concurrency,
            metric: self.metric,
        }
    }

    pub fn expectation(&self) -> IndexExpectation {
        IndexExpectation {
            model: self.embedding_model.clone(),
            dimension: self.embedding_dimension,
            metric: self.metric,
        }
    }

    pub fn ollama(&self) -> OllamaConfig {
        OllamaConfig {
            base_url: self.ollama_url.clone(),
            timeout: self.request_timeout,
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    env_var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| Error::Configuration(format!("invalid {}='{}': {}", key, raw, e)))
        })
        .transpose()
}
