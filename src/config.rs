use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_COLLECTION_PREFIX: &str = "docqa";
const DEFAULT_CHUNK_SIZE: usize = 1000;
const DEFAULT_CHUNK_OVERLAP: usize = 50;
const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 64;
const DEFAULT_TOP_K: usize = 5;
const DEFAULT_DOCUMENT_MAX_BYTES: u64 = 50 * 1024 * 1024;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

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

/// Runtime configuration for the question answering server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared bearer secret expected on authenticated routes.
    pub auth_token: String,
    /// Base URL of the Qdrant instance that stores embeddings.
    pub qdrant_url: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Prefix for the per-request collections created in Qdrant.
    pub qdrant_collection_prefix: String,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: Provider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Number of chunks sent to the embedding provider per call.
    pub embedding_batch_size: usize,
    /// Completion provider used to answer questions.
    pub llm_provider: Provider,
    /// Completion model identifier passed to the provider.
    pub llm_model: String,
    /// Sampling temperature for answer generation.
    pub llm_temperature: f32,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// API key for OpenAI-compatible providers.
    pub openai_api_key: Option<String>,
    /// Base URL for OpenAI-compatible providers.
    pub openai_base_url: String,
    /// Maximum chunk length, in `text_splitter_unit`s.
    pub text_splitter_chunk_size: usize,
    /// Overlap carried from the previous chunk, in `text_splitter_unit`s.
    pub text_splitter_chunk_overlap: usize,
    /// Unit used to measure chunk length.
    pub text_splitter_unit: ChunkUnit,
    /// Number of chunks retrieved per question.
    pub retrieval_top_k: usize,
    /// Upper bound on fetched or uploaded document size.
    pub document_max_bytes: u64,
    /// Whether bare paths and `file://` references are accepted.
    pub document_allow_local: bool,
    /// Optional directory that local document paths must resolve inside.
    pub document_local_root: Option<PathBuf>,
    /// Delete the per-request collection once the request completes.
    pub index_drop_after_request: bool,
    /// Timeout applied to every outbound HTTP call.
    pub http_timeout_secs: u64,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported backends for embeddings and completions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI (or compatible) API.
    OpenAI,
}

/// How chunk sizes are measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkUnit {
    /// Unicode scalar values.
    Characters,
    /// `tiktoken` tokens for the embedding model.
    Tokens,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let embedding_provider = parse_required::<Provider>("EMBEDDING_PROVIDER")?;
        let llm_provider = parse_required::<Provider>("LLM_PROVIDER")?;
        let openai_api_key = load_env_optional("OPENAI_API_KEY");
        if openai_api_key.is_none()
            && (embedding_provider == Provider::OpenAI || llm_provider == Provider::OpenAI)
        {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".into()));
        }

        let (document_allow_local, document_local_root) = local_access(
            parse_bool_optional("DOCUMENT_ALLOW_LOCAL")?,
            load_env_optional("DOCUMENT_LOCAL_ROOT").map(PathBuf::from),
        )?;

        let config = Self {
            auth_token: load_env("AUTH_TOKEN")?,
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            qdrant_collection_prefix: load_env_optional("QDRANT_COLLECTION_PREFIX")
                .unwrap_or_else(|| DEFAULT_COLLECTION_PREFIX.to_string()),
            embedding_provider,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: parse_required("EMBEDDING_DIMENSION")?,
            embedding_batch_size: parse_optional("EMBEDDING_BATCH_SIZE")?
                .unwrap_or(DEFAULT_EMBEDDING_BATCH_SIZE),
            llm_provider,
            llm_model: load_env("LLM_MODEL")?,
            llm_temperature: parse_optional("LLM_TEMPERATURE")?.unwrap_or(0.0),
            ollama_url: load_env_optional("OLLAMA_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            openai_api_key,
            openai_base_url: load_env_optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            text_splitter_chunk_size: parse_optional("TEXT_SPLITTER_CHUNK_SIZE")?
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            text_splitter_chunk_overlap: parse_optional("TEXT_SPLITTER_CHUNK_OVERLAP")?
                .unwrap_or(DEFAULT_CHUNK_OVERLAP),
            text_splitter_unit: parse_optional("TEXT_SPLITTER_UNIT")?
                .unwrap_or(ChunkUnit::Characters),
            retrieval_top_k: parse_optional("RETRIEVAL_TOP_K")?.unwrap_or(DEFAULT_TOP_K),
            document_max_bytes: parse_optional("DOCUMENT_MAX_BYTES")?
                .unwrap_or(DEFAULT_DOCUMENT_MAX_BYTES),
            document_allow_local,
            document_local_root,
            index_drop_after_request: parse_bool_optional("INDEX_DROP_AFTER_REQUEST")?
                .unwrap_or(true),
            http_timeout_secs: parse_optional("HTTP_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            server_port: parse_optional("SERVER_PORT")?,
        };

        if config.auth_token.trim().is_empty() {
            return Err(ConfigError::InvalidValue("AUTH_TOKEN".into()));
        }
        if config.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }
        if config.text_splitter_chunk_size == 0 {
            return Err(ConfigError::InvalidValue("TEXT_SPLITTER_CHUNK_SIZE".into()));
        }
        if config.retrieval_top_k == 0 {
            return Err(ConfigError::InvalidValue("RETRIEVAL_TOP_K".into()));
        }

        Ok(config)
    }

    /// Log the non-secret settings. Call once a tracing subscriber is installed.
    pub fn log_summary(&self) {
        tracing::debug!(
            qdrant_url = %self.qdrant_url,
            collection_prefix = %self.qdrant_collection_prefix,
            embedding_provider = ?self.embedding_provider,
            embedding_model = %self.embedding_model,
            llm_provider = ?self.llm_provider,
            llm_model = %self.llm_model,
            document_allow_local = self.document_allow_local,
            server_port = ?self.server_port,
            "Loaded configuration"
        );
    }
}

/// Local documents stay off unless enabled, and enabling them requires a root to confine reads.
fn local_access(
    allow: Option<bool>,
    root: Option<PathBuf>,
) -> Result<(bool, Option<PathBuf>), ConfigError> {
    let allow = allow.unwrap_or(false);
    if allow && root.is_none() {
        return Err(ConfigError::MissingVariable("DOCUMENT_LOCAL_ROOT".into()));
    }
    Ok((allow, root))
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_required<T: std::str::FromStr>(key: &str) -> Result<T, ConfigError> {
    load_env(key)?
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn parse_bool_optional(key: &str) -> Result<Option<bool>, ConfigError> {
    load_env_optional(key)
        .map(|value| parse_flag(&value).ok_or_else(|| ConfigError::InvalidValue(key.to_string())))
        .transpose()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl std::str::FromStr for Provider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for ChunkUnit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "characters" | "chars" => Ok(Self::Characters),
            "tokens" => Ok(Self::Tokens),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Load configuration from the environment and install it in the global cache.
///
/// `env_file` points at an alternative dotenv file; otherwise `.env` is used when present.
pub fn init_config(env_file: Option<&std::path::Path>) -> Result<&'static Config, ConfigError> {
    match env_file {
        Some(path) => {
            dotenvy::from_path(path).map_err(|_| {
                ConfigError::InvalidValue(format!("env file {}", path.display()))
            })?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    let config = Config::from_env()?;
    Ok(CONFIG.get_or_init(|| config))
}
