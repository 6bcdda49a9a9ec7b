//! Configuration system for Dossier.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> explicit file -> environment.
//! Configuration is loaded from `~/.config/dossier/config.toml` and/or
//! `.dossier/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::research::search::SearchBackend;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub fetch: FetchConfig,
    pub cache: CacheConfig,
    pub embeddings: EmbeddingConfig,
    pub research: ResearchDefaults,
    pub storage: StorageConfig,
}

/// Configuration for the generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "openai", "ollama", "openai-compatible", "anthropic".
    pub provider: String,
    /// Default model; `--model` overrides it per run.
    pub model: String,
    /// Base URL override (Azure, vLLM, LM Studio, proxies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Inline API key. Prefer `api_key_env`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            temperature: 0.2,
            max_tokens: 4096,
            timeout_secs: 120,
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff settings for transient generation errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl RetryConfig {
    /// Wait before retry number `attempt + 1`: the initial backoff grown by
    /// the multiplier, capped, plus up to a quarter more when jitter is on.
    pub fn delay(&self, attempt: u32) -> std::time::Duration {
        let grown = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = grown.min(self.max_backoff_ms as f64).max(0.0) as u64;
        let extra = if self.jitter {
            (capped as f64 * 0.25 * clock_fraction()) as u64
        } else {
            0
        };
        std::time::Duration::from_millis(capped + extra)
    }
}

/// Sub-second clock noise in [0, 1); enough to spread concurrent retries.
fn clock_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    f64::from(nanos % 1000) / 1000.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Configuration for search backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Default backend; `--search` overrides it per run.
    pub backend: SearchBackend,
    /// Language hint passed to backends that support one.
    pub language: String,
    pub timeout_secs: u64,
    /// Maximum concurrent sub-query searches.
    pub concurrency: usize,
    pub user_agent: String,
    pub serpapi_key_env: String,
    pub google_api_key_env: String,
    /// Google Programmable Search engine id. Falls back to `google_cx_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_cx: Option<String>,
    pub google_cx_env: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: SearchBackend::DuckDuckGo,
            language: "en".to_string(),
            timeout_secs: 15,
            concurrency: 3,
            user_agent: concat!("Mozilla/5.0 (compatible; Dossier/", env!("CARGO_PKG_VERSION"), ")")
                .to_string(),
            serpapi_key_env: "SERPAPI_API_KEY".to_string(),
            google_api_key_env: "GOOGLE_API_KEY".to_string(),
            google_cx: None,
            google_cx_env: "GOOGLE_CSE_ID".to_string(),
        }
    }
}

/// Configuration for page fetching and cleaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Maximum concurrent page fetches.
    pub concurrency: usize,
    /// How long a cached page is reused without refetching.
    pub freshness_hours: u64,
    /// Cleaned content is cut to this many characters.
    pub max_content_chars: usize,
    /// Lines shorter than this are treated as boilerplate.
    pub min_line_chars: usize,
    pub max_redirects: usize,
    /// Chrome/Chromium binary for JavaScript rendering (`browser` feature).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            user_agent: concat!("Mozilla/5.0 (compatible; Dossier/", env!("CARGO_PKG_VERSION"), ")")
                .to_string(),
            concurrency: 8,
            freshness_hours: 24,
            max_content_chars: 20_000,
            min_line_chars: 40,
            max_redirects: 5,
            chrome_path: None,
        }
    }
}

/// Configuration for the content cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite file; defaults to `<data dir>/cache.sqlite3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Keep the cache in memory only (nothing persists between runs).
    pub in_memory: bool,
}

/// Configuration for embedding providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider name: "local" (default), "openai", "ollama".
    pub provider: String,
    /// Provider-specific model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Dimensions for the local embedder.
    pub dimensions: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".into(),
            model: None,
            dimensions: 512,
            base_url: None,
            api_key_env: "OPENAI_API_KEY".into(),
        }
    }
}

/// Which planner decomposes topics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlannerKind {
    /// Ask the generation backend for sub-queries.
    #[default]
    Llm,
    /// Offline rule-based decomposition.
    Heuristic,
}

/// Defaults for research runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchDefaults {
    pub max_sources: usize,
    pub max_sub_queries: usize,
    pub planner: PlannerKind,
    /// Characters of each source shown to the synthesizer.
    pub max_excerpt_chars: usize,
    /// Characters of each source fed to the embedder.
    pub max_embed_chars: usize,
    /// Default recency window, e.g. "7d". Empty means unrestricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
}

impl Default for ResearchDefaults {
    fn default() -> Self {
        Self {
            max_sources: 12,
            max_sub_queries: 5,
            planner: PlannerKind::Llm,
            max_excerpt_chars: 1500,
            max_embed_chars: 2000,
            since: None,
        }
    }
}

/// Where briefs and logs are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to `<data dir>/briefs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub briefs_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.research.max_sources == 0 {
            return Err(ConfigError::Invalid {
                message: "research.max_sources must be at least 1".into(),
            });
        }
        if self.research.max_sub_queries == 0 {
            return Err(ConfigError::Invalid {
                message: "research.max_sub_queries must be at least 1".into(),
            });
        }
        if self.search.concurrency == 0 || self.fetch.concurrency == 0 {
            return Err(ConfigError::Invalid {
                message: "search.concurrency and fetch.concurrency must be at least 1".into(),
            });
        }
        if self.embeddings.provider == "local" && self.embeddings.dimensions == 0 {
            return Err(ConfigError::Invalid {
                message: "embeddings.dimensions must be positive for the local embedder".into(),
            });
        }
        Ok(())
    }

    /// Resolved SQLite cache path.
    pub fn cache_path(&self) -> PathBuf {
        self.cache
            .path
            .clone()
            .unwrap_or_else(|| data_dir().join("cache.sqlite3"))
    }

    /// Resolved brief storage directory.
    pub fn briefs_dir(&self) -> PathBuf {
        self.storage
            .briefs_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("briefs"))
    }
}

/// Per-user data directory, falling back to `./.dossier`.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "dossier", "dossier")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".dossier"))
}

/// Config files consulted by [`load_config`], in merge order.
pub fn config_search_paths(workspace: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dirs) = directories::ProjectDirs::from("dev", "dossier", "dossier") {
        paths.push(dirs.config_dir().join("config.toml"));
    }
    if let Some(ws) = workspace {
        paths.push(ws.join(".dossier").join("config.toml"));
    }
    paths
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `DOSSIER_`, `__` for nesting)
/// 2. An explicit config file (`--config`)
/// 3. Workspace-local config (`.dossier/config.toml`)
/// 4. User config (`~/.config/dossier/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<AppConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    for path in config_search_paths(workspace) {
        if path.exists() {
            figment = figment.merge(Toml::file(&path));
        }
    }

    if let Some(path) = explicit {
        // Toml::file silently skips missing files; an explicit path must exist.
        if !path.exists() {
            return Err(Box::new(figment::Error::from(format!(
                "configuration file not found: {}",
                path.display()
            ))));
        }
        figment = figment.merge(Toml::file(path));
    }

    // DOSSIER_LLM__MODEL, DOSSIER_SEARCH__BACKEND, DOSSIER_RESEARCH__MAX_SOURCES, ...
    figment = figment.merge(Env::prefixed("DOSSIER_").split("__"));

    figment.extract().map_err(Box::new)
}
