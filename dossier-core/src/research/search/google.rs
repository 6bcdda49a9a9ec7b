//! Google Programmable Search (Custom Search JSON API).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{SearchOptions, SearchProvider, build_client, map_status, normalize_results};
use crate::config::SearchConfig;
use crate::error::{ConfigError, SearchError};
use crate::research::model::{Recency, SearchResult};

const ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
const NAME: &str = "google";
/// The API refuses `num` above 10.
const MAX_PAGE_SIZE: usize = 10;

pub struct GoogleSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    cx: String,
}

#[derive(Debug, Deserialize)]
struct CseResponse {
    #[serde(default)]
    items: Vec<CseItem>,
}

#[derive(Debug, Deserialize)]
struct CseItem {
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

impl GoogleSearch {
    pub fn new(config: &SearchConfig, api_key: String, cx: String) -> Result<Self, ConfigError> {
        Ok(Self {
            client: build_client(config)?,
            endpoint: ENDPOINT.to_string(),
            api_key,
            cx,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

fn recency_param(recency: Recency) -> &'static str {
    match recency {
        Recency::Day => "d1",
        Recency::Week => "w1",
        Recency::Month => "m1",
        Recency::Year => "y1",
    }
}

fn parse_body(body: &str) -> Result<Vec<SearchResult>, SearchError> {
    let parsed: CseResponse = serde_json::from_str(body).map_err(|e| SearchError::Parse {
        backend: NAME.into(),
        message: e.to_string(),
    })?;
    Ok(parsed
        .items
        .into_iter()
        .map(|item| SearchResult {
            url: item.link,
            title: item.title,
            snippet: item.snippet.replace('\n', " "),
            domain: String::new(),
        })
        .collect())
}

#[async_trait]
impl SearchProvider for GoogleSearch {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let mut params = vec![
            ("key", self.api_key.clone()),
            ("cx", self.cx.clone()),
            ("q", query.to_string()),
            ("num", options.max_results.clamp(1, MAX_PAGE_SIZE).to_string()),
        ];
        if let Some(recency) = options.recency {
            params.push(("dateRestrict", recency_param(recency).to_string()));
        }
        if let Some(language) = &options.language {
            params.push(("lr", format!("lang_{}", language)));
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
        debug!(query, count = raw.len(), "Google CSE results parsed");
        Ok(normalize_results(raw, options.max_results))
    }

    fn name(&self) -> &str {
        NAME
    }
}
