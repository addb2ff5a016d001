use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::format::OutputFormat;
use super::vector::DEFAULT_EMBEDDING_DIMENSION;
use crate::error::ConfigError;

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-pro";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_INDEX: &str = "rag";
pub const DEFAULT_NAMESPACE: &str = "ns1";
pub const DEFAULT_TOP_K: u32 = 5;
pub const MAX_TOP_K: u32 = 20;
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

const PROJECT_CONFIG_FILE: &str = ".profrag.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

impl Config {
    pub fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("profrag").join("config.toml"))
    }

    /// `.profrag.toml` in the current directory, if present.
    pub fn find_project_config() -> Option<PathBuf> {
        let path = std::env::current_dir().ok()?.join(PROJECT_CONFIG_FILE);
        path.exists().then_some(path)
    }

    /// Load the project config, else the global one, else defaults; then
    /// apply environment overrides and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::find_project_config()
            .or_else(|| Self::global_path().filter(|p| p.exists()));

        let mut config = match path {
            Some(path) => Self::load_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Write the config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Write a default config to the global location and return its path.
    pub fn init_global() -> Result<PathBuf, ConfigError> {
        let path = Self::global_path().ok_or_else(|| {
            ConfigError::PathError("could not determine config directory".to_string())
        })?;
        Self::default().save_to(&path)?;
        Ok(path)
    }

    /// Write a default project config into the current directory.
    pub fn init_project() -> Result<PathBuf, ConfigError> {
        let path = std::env::current_dir()?.join(PROJECT_CONFIG_FILE);
        Self::default().save_to(&path)?;
        Ok(path)
    }

    /// Overlay API keys and endpoints from the environment.
    ///
    /// `lookup` is injected so tests do not touch the process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let gemini_key = lookup("GEMINI_API_KEY").or_else(|| lookup("API_KEY"));
        if let Some(key) = gemini_key {
            self.embedding.api_key = Some(key.clone());
            self.generation.api_key = Some(key);
        }
        if let Some(key) = lookup("PINECONE_API_KEY") {
            self.vector_store.api_key = Some(key);
        }
        if let Some(host) = lookup("PINECONE_INDEX_HOST")
            && self.vector_store.driver == VectorDriver::Pinecone
        {
            self.vector_store.url = host;
        }
        if let Some(url) = lookup("QDRANT_URL")
            && self.vector_store.driver == VectorDriver::Qdrant
        {
            self.vector_store.url = url;
        }
        if let Some(bind) = lookup("PROFRAG_BIND") {
            self.server.bind = bind;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let top_k = self.vector_store.top_k;
        if top_k == 0 || top_k > MAX_TOP_K {
            return Err(ConfigError::ValidationError(format!(
                "vector_store.top_k must be between 1 and {MAX_TOP_K}, got {top_k}"
            )));
        }
        if self.embedding.dimension == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.dimension must be positive".to_string(),
            ));
        }
        if self.embedding.model.trim().is_empty() || self.generation.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "model identifiers cannot be empty".to_string(),
            ));
        }
        if self.generation.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "generation.channel_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingDriver {
    /// Google Generative Language `embedContent`.
    #[default]
    Gemini,
    /// Self-hosted text-embeddings-inference `/embed`.
    Tei,
}

impl std::fmt::Display for EmbeddingDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingDriver::Gemini => write!(f, "gemini"),
            EmbeddingDriver::Tei => write!(f, "tei"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub driver: EmbeddingDriver,

    #[serde(default = "default_gemini_url")]
    pub url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimension")]
    pub dimension: u32,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_gemini_url() -> String {
    DEFAULT_GEMINI_URL.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_dimension() -> u32 {
    DEFAULT_EMBEDDING_DIMENSION as u32
}

fn default_embedding_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            driver: EmbeddingDriver::default(),
            url: default_gemini_url(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_max_retries(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorDriver {
    #[default]
    Pinecone,
    Qdrant,
}

impl std::fmt::Display for VectorDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorDriver::Pinecone => write!(f, "pinecone"),
            VectorDriver::Qdrant => write!(f, "qdrant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub driver: VectorDriver,

    /// Pinecone index host or Qdrant gRPC URL.
    #[serde(default)]
    pub url: String,

    /// Pinecone index name / Qdrant collection.
    #[serde(default = "default_index")]
    pub index: String,

    /// Pinecone namespace. Qdrant scopes by collection and ignores it.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_top_k")]
    pub top_k: u32,

    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_index() -> String {
    DEFAULT_INDEX.to_string()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_top_k() -> u32 {
    DEFAULT_TOP_K
}

fn default_store_timeout() -> u64 {
    15
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            driver: VectorDriver::default(),
            url: String::new(),
            index: default_index(),
            namespace: default_namespace(),
            top_k: default_top_k(),
            timeout_secs: default_store_timeout(),
            max_retries: default_max_retries(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_gemini_url")]
    pub url: String,

    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Connect and idle-read timeout. A streaming answer has no total limit
    /// here; `server.request_timeout_secs` bounds whole requests.
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// Replaces the built-in instructions when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Chunks buffered between the stream reader and the consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_generation_model() -> String {
    DEFAULT_GENERATION_MODEL.to_string()
}

fn default_generation_timeout() -> u64 {
    120
}

fn default_channel_capacity() -> usize {
    32
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: default_gemini_url(),
            model: default_generation_model(),
            timeout_secs: default_generation_timeout(),
            system_prompt: None,
            channel_capacity: default_channel_capacity(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Per-request deadline; unset means no deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub default_format: OutputFormat,
}
