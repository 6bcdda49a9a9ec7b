//! Research data model: run parameters, sources, findings and the brief.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::ConfigError;
use crate::research::search::SearchBackend;

/// Recency window applied to searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recency {
    Day,
    Week,
    Month,
    Year,
}

impl Recency {
    /// Approximate length of the window.
    pub fn as_duration(&self) -> chrono::Duration {
        match self {
            Recency::Day => chrono::Duration::days(1),
            Recency::Week => chrono::Duration::weeks(1),
            Recency::Month => chrono::Duration::days(30),
            Recency::Year => chrono::Duration::days(365),
        }
    }
}

impl FromStr for Recency {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "24h" | "1d" | "d" | "day" => Ok(Recency::Day),
            "7d" | "1w" | "w" | "week" => Ok(Recency::Week),
            "30d" | "31d" | "1m" | "m" | "month" => Ok(Recency::Month),
            "365d" | "12m" | "1y" | "y" | "year" => Ok(Recency::Year),
            other => Err(ConfigError::UnknownVariant {
                kind: "recency window".into(),
                value: other.into(),
            }),
        }
    }
}

impl fmt::Display for Recency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Recency::Day => "day",
            Recency::Week => "week",
            Recency::Month => "month",
            Recency::Year => "year",
        };
        f.write_str(s)
    }
}

/// Brief rendering format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            other => Err(ConfigError::UnknownVariant {
                kind: "output format".into(),
                value: other.into(),
            }),
        }
    }
}

/// Immutable parameters of one research run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Maximum total sources kept in the brief.
    pub max_sources: usize,
    /// Only consider results from this window.
    pub since: Option<Recency>,
    /// Generation model identifier.
    pub model: String,
    pub search_backend: SearchBackend,
    /// Render pages with a headless browser.
    pub use_js: bool,
    /// Skip cache lookups (fresh results are still written).
    pub refresh: bool,
    pub output_format: OutputFormat,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_sources: 12,
            since: None,
            model: "gpt-4o-mini".into(),
            search_backend: SearchBackend::DuckDuckGo,
            use_js: false,
            refresh: false,
            output_format: OutputFormat::Markdown,
        }
    }
}

impl ResearchConfig {
    /// Build run parameters from the loaded application config.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let since = match config.research.since.as_deref() {
            Some(s) if !s.trim().is_empty() => Some(s.parse()?),
            _ => None,
        };
        Ok(Self {
            max_sources: config.research.max_sources,
            since,
            model: config.llm.model.clone(),
            search_backend: config.search.backend,
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sources == 0 {
            return Err(ConfigError::Invalid {
                message: "max_sources must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Coarse kind of a source, inferred from its domain and path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Paper,
    Repo,
    News,
    Blog,
    Web,
}

const SOURCE_PATTERNS: &[(&str, SourceType)] = &[
    ("arxiv.org", SourceType::Paper),
    ("doi.org", SourceType::Paper),
    ("acm.org", SourceType::Paper),
    ("ieee.org", SourceType::Paper),
    ("semanticscholar.org", SourceType::Paper),
    ("openreview.net", SourceType::Paper),
    ("nature.com", SourceType::Paper),
    ("springer.com", SourceType::Paper),
    ("github.com", SourceType::Repo),
    ("gitlab.com", SourceType::Repo),
    ("codeberg.org", SourceType::Repo),
    ("bitbucket.org", SourceType::Repo),
    ("reuters.com", SourceType::News),
    ("apnews.com", SourceType::News),
    ("bbc.co", SourceType::News),
    ("nytimes.com", SourceType::News),
    ("theguardian.com", SourceType::News),
    ("bloomberg.com", SourceType::News),
    ("techcrunch.com", SourceType::News),
    ("theverge.com", SourceType::News),
    ("arstechnica.com", SourceType::News),
    ("news.", SourceType::News),
    ("medium.com", SourceType::Blog),
    ("substack.com", SourceType::Blog),
    ("dev.to", SourceType::Blog),
    ("hashnode", SourceType::Blog),
    ("wordpress.com", SourceType::Blog),
    ("blogspot.", SourceType::Blog),
    ("blog.", SourceType::Blog),
    ("/blog/", SourceType::Blog),
];

impl SourceType {
    /// First matching pattern wins; unmatched URLs are `Web`.
    pub fn infer(url: &str) -> Self {
        let lower = url.to_ascii_lowercase();
        SOURCE_PATTERNS
            .iter()
            .find(|(pattern, _)| lower.contains(pattern))
            .map(|(_, kind)| *kind)
            .unwrap_or(SourceType::Web)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceType::Paper => "paper",
            SourceType::Repo => "repo",
            SourceType::News => "news",
            SourceType::Blog => "blog",
            SourceType::Web => "web",
        };
        f.write_str(s)
    }
}

/// Raw search hit, before fetching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub domain: String,
}

/// A fetched and cleaned page. Also the cache's value type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub domain: String,
    pub content: String,
    pub fetched_at: DateTime<Utc>,
}

/// A deduplicated unit of evidence in a brief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Stable identifier derived from the normalized URL.
    pub id: String,
    pub url: String,
    pub title: String,
    pub domain: String,
    /// Cleaned text content.
    pub content: String,
    pub retrieved_at: DateTime<Utc>,
    /// Relevance to the topic (0.0-1.0), set by the ranker.
    pub relevance: f64,
    pub source_type: SourceType,
}

impl Source {
    /// Build a source from a fetched article. The id is keyed on the
    /// article's own URL, so requests that redirect to one page share it.
    pub fn from_article(article: Article) -> Self {
        Self {
            id: source_id(&article.url),
            source_type: SourceType::infer(&article.url),
            url: article.url,
            title: article.title,
            domain: article.domain,
            content: article.content,
            retrieved_at: article.fetched_at,
            relevance: 0.0,
        }
    }
}

/// One synthesized section of a brief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedFinding {
    pub label: String,
    pub content: String,
    /// Zero-based positions into the brief's `sources`.
    pub citations: Vec<usize>,
    /// Confidence (0.0-1.0).
    pub confidence: f64,
}

/// The finished research artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchBrief {
    pub id: Uuid,
    pub topic: String,
    pub executive_summary: String,
    pub findings: Vec<DetailedFinding>,
    pub open_questions: Vec<String>,
    /// Sorted by relevance, descending.
    pub sources: Vec<Source>,
    pub sub_queries: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub config: ResearchConfig,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Canonical form of a URL for identity and dedup.
///
/// Lowercases scheme and host, drops the fragment and a trailing slash.
/// Unparseable input is returned trimmed.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut parsed) = url::Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    parsed.set_fragment(None);
    let mut out = parsed.to_string();
    if parsed.query().is_none() && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Host of a URL without a leading `www.`.
pub fn domain_of(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

/// First 16 hex chars of the SHA-256 of the normalized URL.
pub fn source_id(url: &str) -> String {
    let digest = Sha256::digest(normalize_url(url).as_bytes());
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}
