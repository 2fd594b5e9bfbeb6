use crate::indexing::IndexerSettings;
use crate::readers::EnhancedPdfConfig;
use crate::summarization::DEFAULT_OLLAMA_URL;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the indexer binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root directory of the persisted summary indexes.
    pub databases_dir: PathBuf,
    /// Base URL of the Qdrant instance that stores embeddings.
    pub qdrant_url: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// Model used for summaries; summarization is unavailable without one.
    pub summarization_model: Option<String>,
    /// Maximum tokens per chunk.
    pub text_splitter_chunk_size: usize,
    /// Overlap between consecutive chunks, as a percentage of the chunk size.
    pub text_splitter_chunk_overlap: usize,
    /// Whether PDFs are first offered to the external converter.
    pub use_enhanced_pdf_processing: bool,
    /// External PDF-to-Markdown converter.
    pub enhanced_pdf_command: String,
    /// Chunks per embedding request.
    pub embedding_batch_size: usize,
    /// Concurrent embedding requests.
    pub embedding_workers: usize,
    /// Chunks per vector-store upsert.
    pub upsert_batch_size: usize,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Deterministic offline hashing.
    Hashing,
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "hashing" => Ok(Self::Hashing),
            _ => Err(()),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        Ok(Self {
            databases_dir: PathBuf::from(vars.or("RAG_DATABASES_DIR", "../databases")),
            qdrant_url: vars.or("QDRANT_URL", "http://localhost:6333"),
            qdrant_api_key: vars.optional("QDRANT_API_KEY"),
            embedding_provider: vars
                .or("EMBEDDING_PROVIDER", "hashing")
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            embedding_model: vars.or("EMBEDDING_MODEL", "nomic-embed-text"),
            embedding_dimension: vars.parsed("EMBEDDING_DIMENSION", 768)?,
            ollama_url: vars.or("OLLAMA_URL", DEFAULT_OLLAMA_URL),
            summarization_model: vars.optional("SUMMARIZATION_MODEL"),
            text_splitter_chunk_size: vars.parsed("TEXT_SPLITTER_CHUNK_SIZE", 512)?,
            text_splitter_chunk_overlap: vars.parsed("TEXT_SPLITTER_CHUNK_OVERLAP", 10)?,
            use_enhanced_pdf_processing: vars
                .optional("USE_ENHANCED_PDF_PROCESSING")
                .is_some_and(|value| value.eq_ignore_ascii_case("true")),
            enhanced_pdf_command: vars.or("ENHANCED_PDF_COMMAND", "docling"),
            embedding_batch_size: vars.positive("EMBEDDING_BATCH_SIZE", 100)?,
            embedding_workers: vars.positive("EMBEDDING_WORKERS", 20)?,
            upsert_batch_size: vars.positive("UPSERT_BATCH_SIZE", 1000)?,
        })
    }

    /// Batching knobs for the embedding indexer.
    pub fn indexer_settings(&self) -> IndexerSettings {
        IndexerSettings {
            embed_batch_size: self.embedding_batch_size,
            max_workers: self.embedding_workers,
            upsert_batch_size: self.upsert_batch_size,
        }
    }

    /// External PDF conversion settings.
    pub fn enhanced_pdf(&self) -> EnhancedPdfConfig {
        EnhancedPdfConfig {
            enabled: self.use_enhanced_pdf_processing,
            command: self.enhanced_pdf_command.clone(),
        }
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        self.optional(key)
            .map(|value| {
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string()))
            })
            .transpose()
            .map(|value| value.unwrap_or(default))
    }

    fn positive(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        match self.parsed(key, default)? {
            0 => Err(ConfigError::InvalidValue(key.to_string())),
            value => Ok(value),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, `None` before [`init_config`] ran.
pub fn get_config() -> Option<&'static Config> {
    CONFIG.get()
}

/// Load configuration from `.env` and the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        databases_dir = %config.databases_dir.display(),
        embedding_provider = ?config.embedding_provider,
        summarization_model = ?config.summarization_model,
        enhanced_pdf = config.use_enhanced_pdf_processing,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
