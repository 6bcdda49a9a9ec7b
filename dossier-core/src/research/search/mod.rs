//! Search backends.
//!
//! Every backend answers one query with a ranked list of [`SearchResult`]s.
//! The backend is chosen once per run from [`SearchBackend`] and built by
//! [`create_search_provider`]; the engine only sees `dyn SearchProvider`.

pub mod duckduckgo;
pub mod google;
pub mod mock;
pub mod serpapi;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SearchConfig;
use crate::error::{ConfigError, SearchError};
use crate::research::model::{Recency, SearchResult, domain_of, normalize_url};

pub use duckduckgo::DuckDuckGoSearch;
pub use google::GoogleSearch;
pub use mock::MockSearchProvider;
pub use serpapi::SerpApiSearch;

/// Per-query search options.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Maximum results to return.
    pub max_results: usize,
    pub recency: Option<Recency>,
    /// Language hint such as "en".
    pub language: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 10,
            recency: None,
            language: None,
        }
    }
}

/// A search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SearchError>;

    /// Backend name, used in logs and brief metadata.
    fn name(&self) -> &str;
}

/// The closed set of supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchBackend {
    #[serde(rename = "duckduckgo", alias = "ddg")]
    DuckDuckGo,
    #[serde(rename = "serpapi")]
    SerpApi,
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "mock")]
    Mock,
}

impl SearchBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchBackend::DuckDuckGo => "duckduckgo",
            SearchBackend::SerpApi => "serpapi",
            SearchBackend::Google => "google",
            SearchBackend::Mock => "mock",
        }
    }
}

impl FromStr for SearchBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duckduckgo" | "ddg" => Ok(SearchBackend::DuckDuckGo),
            "serpapi" => Ok(SearchBackend::SerpApi),
            "google" => Ok(SearchBackend::Google),
            "mock" => Ok(SearchBackend::Mock),
            other => Err(ConfigError::UnknownVariant {
                kind: "search backend".into(),
                value: other.into(),
            }),
        }
    }
}

impl fmt::Display for SearchBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the provider for `backend`. Credential checks for keyed backends
/// happen here so a misconfigured run fails before planning.
pub fn create_search_provider(
    backend: SearchBackend,
    config: &SearchConfig,
) -> Result<Arc<dyn SearchProvider>, ConfigError> {
    match backend {
        SearchBackend::DuckDuckGo => Ok(Arc::new(DuckDuckGoSearch::new(config)?)),
        SearchBackend::SerpApi => {
            let key = read_env(&config.serpapi_key_env)?;
            Ok(Arc::new(SerpApiSearch::new(config, key)?))
        }
        SearchBackend::Google => {
            let key = read_env(&config.google_api_key_env)?;
            let cx = match &config.google_cx {
                Some(cx) if !cx.is_empty() => cx.clone(),
                _ => read_env(&config.google_cx_env)?,
            };
            Ok(Arc::new(GoogleSearch::new(config, key, cx)?))
        }
        SearchBackend::Mock => Ok(Arc::new(MockSearchProvider::new())),
    }
}

fn read_env(var: &str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::EnvVarMissing { var: var.into() }),
    }
}

/// HTTP client shared by the keyed and keyless backends.
pub(crate) fn build_client(config: &SearchConfig) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.as_str())
        .build()
        .map_err(|e| ConfigError::Invalid {
            message: format!("Failed to create HTTP client: {}", e),
        })
}

/// Map a non-success HTTP status to a `SearchError`.
pub(crate) fn map_status(backend: &str, status: u16, body: &str) -> SearchError {
    match status {
        401 | 403 => SearchError::Auth {
            backend: backend.into(),
        },
        429 => SearchError::RateLimited {
            backend: backend.into(),
        },
        _ => SearchError::Http {
            backend: backend.into(),
            status,
            message: body.chars().take(200).collect(),
        },
    }
}

/// Shared cleanup applied to every backend's raw hits.
///
/// Drops non-http(s) URLs, fills `domain`, trims text, removes duplicate
/// URLs (first wins) and caps the list.
pub fn normalize_results(raw: Vec<SearchResult>, max_results: usize) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .filter_map(|mut result| {
            let url = result.url.trim().to_string();
            let parsed = url::Url::parse(&url).ok()?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return None;
            }
            if !seen.insert(normalize_url(&url)) {
                return None;
            }
            result.domain = domain_of(&url).unwrap_or_default();
            result.url = url;
            result.title = result.title.trim().to_string();
            result.snippet = result.snippet.trim().to_string();
            Some(result)
        })
        .take(max_results)
        .collect()
}
