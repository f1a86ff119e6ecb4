use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost:5432/lodestone";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_DIMENSION: usize = 1536;
const DEFAULT_CHUNK_SIZE: usize = 1000;
const DEFAULT_BATCH_SIZE: usize = 64;
const DEFAULT_CONCURRENCY: usize = 8;
const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize)]
pub struct CorpusConfig {
    /// Directory whose documents are indexed.
    #[serde(default = "default_root")]
    pub root: String,
    /// File extensions the corpus walk keeps.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Glob patterns a path must match to be indexable. Empty keeps all.
    #[serde(default)]
    pub include: Vec<String>,
    /// Glob patterns that drop a path even when included.
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingConfig {
    /// `openai` or `ollama`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Output vector width of the model.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Environment variable holding the API key for hosted providers.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Text search language baked into the chunk tables.
    #[serde(default = "default_language")]
    pub language: String,
    /// Maximum chunk size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Chunks per embedding batch and per store write.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrent requests for per-item providers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Vector hits at or below this cosine similarity are dropped.
    #[serde(default)]
    pub min_similarity: f32,
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LODESTONE_DATABASE_URL") {
            self.index.database_url = v;
        }
        if let Ok(v) = std::env::var("LODESTONE_EMBED_PROVIDER") {
            self.embedding.provider = v;
        }
        if let Ok(v) = std::env::var("LODESTONE_EMBED_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("LODESTONE_EMBED_MODEL") {
            self.embedding.model = v;
        }
    }

    /// # Errors
    ///
    /// Returns an error for values no command could run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            matches!(self.embedding.provider.as_str(), "openai" | "ollama"),
            "unknown embedding provider {:?} (expected \"openai\" or \"ollama\")",
            self.embedding.provider
        );
        anyhow::ensure!(self.embedding.dimension > 0, "embedding dimension must be positive");
        anyhow::ensure!(self.index.chunk_size > 0, "chunk_size must be positive");
        anyhow::ensure!(self.index.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(self.search.limit > 0, "search limit must be positive");
        Ok(())
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            extensions: default_extensions(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            dimension: default_dimension(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            language: default_language(),
            chunk_size: default_chunk_size(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            min_similarity: 0.0,
        }
    }
}

fn default_root() -> String {
    ".".into()
}

fn default_extensions() -> Vec<String> {
    vec!["md".into(), "markdown".into(), "txt".into()]
}

fn default_provider() -> String {
    "openai".into()
}

fn default_base_url() -> String {
    DEFAULT_OPENAI_BASE_URL.into()
}

fn default_model() -> String {
    DEFAULT_MODEL.into()
}

fn default_dimension() -> usize {
    DEFAULT_DIMENSION
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.into()
}

fn default_language() -> String {
    "simple".into()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}
