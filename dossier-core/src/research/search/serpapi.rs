//! SerpAPI (Google results as JSON).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{SearchOptions, SearchProvider, build_client, map_status, normalize_results};
use crate::config::SearchConfig;
use crate::error::{ConfigError, SearchError};
use crate::research::model::{Recency, SearchResult};

const ENDPOINT: &str = "https://serpapi.com/search.json";
const NAME: &str = "serpapi";

pub struct SerpApiSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SerpApiResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

impl SerpApiSearch {
    pub fn new(config: &SearchConfig, api_key: String) -> Result<Self, ConfigError> {
        Ok(Self {
            client: build_client(config)?,
            endpoint: ENDPOINT.to_string(),
            api_key,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

fn recency_param(recency: Recency) -> &'static str {
    match recency {
        Recency::Day => "qdr:d",
        Recency::Week => "qdr:w",
        Recency::Month => "qdr:m",
        Recency::Year => "qdr:y",
    }
}

/// Parse a SerpAPI JSON body into raw results.
fn parse_body(body: &str) -> Result<Vec<SearchResult>, SearchError> {
    let parsed: SerpApiResponse = serde_json::from_str(body).map_err(|e| SearchError::Parse {
        backend: NAME.into(),
        message: e.to_string(),
    })?;
    // SerpAPI reports "no results" as an error string with a 200.
    if let Some(error) = parsed.error
        && parsed.organic_results.is_empty()
        && !error.to_ascii_lowercase().contains("hasn't returned any results")
    {
        return Err(SearchError::Http {
            backend: NAME.into(),
            status: 200,
            message: error,
        });
    }
    Ok(parsed
        .organic_results
        .into_iter()
        .map(|r| SearchResult {
            url: r.link,
            title: r.title,
            snippet: r.snippet,
            domain: String::new(),
        })
        .collect())
}

#[async_trait]
impl SearchProvider for SerpApiSearch {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let mut params = vec![
            ("engine", "google".to_string()),
            ("q", query.to_string()),
            ("num", options.max_results.clamp(1, 100).to_string()),
            ("api_key", self.api_key.clone()),
        ];
        if let Some(recency) = options.recency {
            params.push(("tbs", recency_param(recency).to_string()));
        }
        if let Some(language) = &options.language {
            params.push(("hl", language.clone()));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .await
            .map_err(|e| SearchError::Request {
                backend: NAME.into(),
                message: e.without_url().to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| SearchError::Request {
            backend: NAME.into(),
            message: e.without_url().to_string(),
        })?;
        if !status.is_success() {
            return Err(map_status(NAME, status.as_u16(), &body));
        }

        let raw = parse_body(&body)?;
        debug!(query, count = raw.len(), "SerpAPI results parsed");
        Ok(normalize_results(raw, options.max_results))
    }

    fn name(&self) -> &str {
        NAME
    }
}
