use crate::chunker::chunk_text;
use recollect_core::{RecollectError, RecollectResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the database inside `data_dir`.
pub const DEFAULT_DB_FILE: &str = "memory.db";

/// Top-level configuration, usually read from `recollect.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecollectConfig {
    /// Directory for the database; `./data` by default.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Explicit database path; defaults to `<data_dir>/memory.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Directory holding the `YYYY-MM-DD.md` daily notes.
    #[serde(default = "default_notes_dir")]
    pub notes_dir: PathBuf,
    /// `[embedding]`: backend and model.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// `[chunking]`: split sizes for long sections.
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// `[search]`: CLI defaults.
    #[serde(default)]
    pub search: SearchConfig,
}

impl Default for RecollectConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_path: None,
            notes_dir: default_notes_dir(),
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl RecollectConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> RecollectResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| RecollectError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config file at `path`, falling back to defaults when it does
    /// not exist.
    pub fn load(path: &Path) -> RecollectResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|e| {
            RecollectError::Config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&data)
    }

    /// Resolved database location.
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DEFAULT_DB_FILE))
    }

    /// Reject settings no backend or command can work with.
    pub fn validate(&self) -> RecollectResult<()> {
        self.chunking.validate()?;
        if self.search.default_limit == 0 {
            return Err(RecollectError::Config(
                "search.default_limit must be greater than zero".to_string(),
            ));
        }
        if self.embedding.dimension() == 0 {
            return Err(RecollectError::Config(
                "embedding.dimension must be greater than zero".to_string(),
            ));
        }
        if self.embedding.timeout_secs == 0 {
            return Err(RecollectError::Config(
                "embedding.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_notes_dir() -> PathBuf {
    PathBuf::from("./memory")
}

/// Which embedding backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Hashed bag-of-words, runs in-process with no downloads.
    #[default]
    Local,
    /// Any OpenAI-compatible `/v1/embeddings` endpoint.
    OpenAi,
    /// Local ONNX sentence encoder via fastembed.
    FastEmbed,
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend to build.
    #[serde(default)]
    pub provider: EmbeddingBackend,
    /// Model name; each backend has a default. Ignored by `local`.
    #[serde(default)]
    pub model: Option<String>,
    /// Vector length; each backend has a default. When set, the openai
    /// backend asks the server for this size.
    #[serde(default)]
    pub dimension: Option<usize>,
    /// API key for the openai backend.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable read when `api_key` is unset.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Defaults to `https://api.openai.com`.
    pub api_base_url: Option<String>,
    /// HTTP request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::default(),
            model: None,
            dimension: None,
            api_key: None,
            api_key_env: default_api_key_env(),
            api_base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    /// Name the built provider will tag its vectors with.
    ///
    /// The local backend is always `local-hash-<dimension>`, so changing its
    /// dimension counts as a model change.
    pub fn model(&self) -> String {
        match (self.provider, &self.model) {
            (EmbeddingBackend::Local, _) => format!("local-hash-{}", self.dimension()),
            (_, Some(model)) => model.clone(),
            (EmbeddingBackend::OpenAi, None) => "text-embedding-3-small".to_string(),
            (EmbeddingBackend::FastEmbed, None) => "all-MiniLM-L6-v2".to_string(),
        }
    }

    /// Configured vector length, or the backend's default.
    pub fn dimension(&self) -> usize {
        self.dimension.unwrap_or(match self.provider {
            EmbeddingBackend::Local => 256,
            EmbeddingBackend::OpenAi => 1536,
            EmbeddingBackend::FastEmbed => 384,
        })
    }

    /// API root without a trailing slash.
    pub fn base_url(&self) -> &str {
        match &self.api_base_url {
            Some(url) => url.trim_end_matches('/'),
            None => "https://api.openai.com",
        }
    }

    /// The configured key, or the value of `api_key_env`.
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.is_empty())
    }
}

/// Window sizes for [`chunk_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Longest chunk, in characters.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Characters shared by consecutive chunks.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    500
}
fn default_overlap_chars() -> usize {
    50
}

impl ChunkingConfig {
    /// The overlap must be smaller than a non-empty window.
    pub fn validate(&self) -> RecollectResult<()> {
        if self.max_chars == 0 || self.overlap_chars >= self.max_chars {
            return Err(RecollectError::Config(format!(
                "chunking.overlap_chars ({}) must be smaller than chunking.max_chars ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }

    /// [`chunk_text`] with these sizes.
    pub fn split(&self, text: &str) -> RecollectResult<Vec<String>> {
        chunk_text(text, self.max_chars, self.overlap_chars)
    }
}

/// `[search]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Results returned when no limit is given.
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Hours on each side of the anchor for `timeline`.
    #[serde(default = "default_timeline_window_hours")]
    pub timeline_window_hours: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            timeline_window_hours: default_timeline_window_hours(),
        }
    }
}

fn default_limit() -> usize {
    10
}
fn default_timeline_window_hours() -> u32 {
    crate::search::DEFAULT_TIMELINE_WINDOW_HOURS
}
