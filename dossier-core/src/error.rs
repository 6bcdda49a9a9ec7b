//! Error types for the Dossier research core.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering generation, search, fetch, cache, ranking, synthesis, and
//! configuration domains. `ResearchError` is the one error a pipeline run
//! surfaces; it names the fatal stage.

use std::path::PathBuf;

/// Top-level error type for the Dossier core library.
#[derive(Debug, thiserror::Error)]
pub enum DossierError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Research error: {0}")]
    Research(#[from] ResearchError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the generation backend.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Unsupported LLM provider: {provider}")]
    UnsupportedProvider { provider: String },
}

impl LlmError {
    /// Rate limits, timeouts and dropped connections clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Connection { .. } | LlmError::Timeout { .. }
        )
    }

    /// Minimum wait the provider asked for, if any.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            LlmError::RateLimited { retry_after_secs } => {
                Some(std::time::Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

/// Errors from one search backend call.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("{backend} request failed: {message}")]
    Request { backend: String, message: String },

    #[error("{backend} returned HTTP {status}: {message}")]
    Http {
        backend: String,
        status: u16,
        message: String,
    },

    #[error("{backend} rejected the credentials")]
    Auth { backend: String },

    #[error("{backend} rate limit or quota exhausted")]
    RateLimited { backend: String },

    #[error("{backend} response could not be parsed: {message}")]
    Parse { backend: String, message: String },

    #[error("{backend} requires an API key in ${var}")]
    MissingCredential { backend: String, var: String },
}

/// Errors from fetching a single URL.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("Request for {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Unsupported content type '{content_type}' at {url}")]
    UnsupportedContent { url: String, content_type: String },

    #[error("No readable content at {url}")]
    Empty { url: String },

    #[error("Rendering {url} failed: {message}")]
    Render { url: String, message: String },
}

/// Errors from the content cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache storage error: {message}")]
    Storage { message: String },

    #[error("Cached entry for {url} is corrupt: {message}")]
    Corrupt { url: String, message: String },
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::Storage {
            message: err.to_string(),
        }
    }
}

/// Errors from embedding providers.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("{provider} embedding request failed: {message}")]
    Request { provider: String, message: String },

    #[error("{provider} returned {actual} embeddings for {expected} inputs")]
    CountMismatch {
        provider: String,
        expected: usize,
        actual: usize,
    },
}

/// Errors from topic decomposition.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("generation failed: {0}")]
    Llm(#[from] LlmError),

    #[error("planner produced no sub-queries")]
    Empty,
}

/// Errors from relevance ranking.
#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// Errors from brief synthesis.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("generation failed: {0}")]
    Llm(#[from] LlmError),

    #[error("synthesis output could not be parsed: {message}")]
    Parse { message: String },

    #[error("finding '{finding}' cites [{citation}] but only {source_count} sources exist")]
    InvalidCitation {
        finding: String,
        citation: i64,
        source_count: usize,
    },

    #[error("no sources to synthesize from")]
    NoSources,
}

/// The error a research run fails with. Each variant names a fatal stage.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("Topic must not be empty")]
    EmptyTopic,

    #[error("Invalid research configuration: {0}")]
    InvalidConfig(#[source] ConfigError),

    #[error("Planning failed: {0}")]
    Planning(#[source] PlannerError),

    #[error("All {attempted} sub-query searches failed: {errors}")]
    AllSearchesFailed { attempted: usize, errors: String },

    #[error("No sources could be fetched from {candidates} search results")]
    NoSources { candidates: usize },

    #[error("Ranking failed: {0}")]
    Ranking(#[source] RankError),

    #[error("Synthesis failed: {0}")]
    Synthesis(#[source] SynthesisError),

    #[error(
        "Synthesis contract violation: finding '{finding}' cites source {index} of {source_count}"
    )]
    InvalidCitation {
        finding: String,
        index: usize,
        source_count: usize,
    },

    #[error("Research cancelled during {stage}")]
    Cancelled { stage: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Unknown {kind} '{value}'")]
    UnknownVariant { kind: String, value: String },
}

/// A type alias for results using the top-level `DossierError`.
pub type Result<T> = std::result::Result<T, DossierError>;
