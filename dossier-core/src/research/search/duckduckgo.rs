//! DuckDuckGo HTML endpoint. Needs no API key.

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::{SearchOptions, SearchProvider, build_client, map_status, normalize_results};
use crate::config::SearchConfig;
use crate::error::{ConfigError, SearchError};
use crate::research::model::{Recency, SearchResult};

const ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const NAME: &str = "duckduckgo";

/// Scrapes result anchors and snippets from DuckDuckGo's HTML results page.
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    endpoint: String,
    result_re: Regex,
    snippet_re: Regex,
    tag_re: Regex,
}

impl DuckDuckGoSearch {
    pub fn new(config: &SearchConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: build_client(config)?,
            endpoint: ENDPOINT.to_string(),
            result_re: compile(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)?,
            snippet_re: compile(r#"(?s)<a[^>]*class="result__snippet"[^>]*>(.*?)</a>"#)?,
            tag_re: compile(r"<[^>]+>")?,
        })
    }

    /// Point at a different endpoint (tests, proxies).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Extract results from a results page, in page order. A snippet is
    /// only taken from between its own anchor and the next result's anchor.
    pub fn parse_results(&self, html: &str) -> Vec<SearchResult> {
        let anchors: Vec<_> = self.result_re.captures_iter(html).collect();
        anchors
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let start = c.get(0).map(|m| m.end()).unwrap_or_default();
                let end = anchors
                    .get(i + 1)
                    .and_then(|next| next.get(0))
                    .map(|m| m.start())
                    .unwrap_or(html.len());
                let snippet = self
                    .snippet_re
                    .captures(&html[start..end])
                    .map(|s| self.strip_tags(&s[1]))
                    .unwrap_or_default();
                SearchResult {
                    url: unwrap_redirect(&decode_attr(&c[1])),
                    title: self.strip_tags(&c[2]),
                    snippet,
                    domain: String::new(),
                }
            })
            .collect()
    }

    fn strip_tags(&self, fragment: &str) -> String {
        decode_attr(&self.tag_re.replace_all(fragment, ""))
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::Invalid {
        message: format!("bad search pattern: {}", e),
    })
}

fn recency_param(recency: Recency) -> &'static str {
    match recency {
        Recency::Day => "d",
        Recency::Week => "w",
        Recency::Month => "m",
        Recency::Year => "y",
    }
}

/// Region code for the `kl` parameter.
fn region_param(language: &str) -> String {
    match language {
        "en" => "us-en".to_string(),
        "de" | "fr" | "es" | "it" | "nl" => format!("{}-{}", language, language),
        "ja" => "jp-jp".to_string(),
        other => format!("wt-{}", other),
    }
}

fn decode_attr(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
}

/// Result links go through `//duckduckgo.com/l/?uddg=<encoded target>`.
fn unwrap_redirect(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };
    if let Ok(parsed) = url::Url::parse(&absolute)
        && parsed.path().starts_with("/l/")
        && let Some((_, target)) = parsed.query_pairs().find(|(k, _)| k == "uddg")
    {
        return target.into_owned();
    }
    urlencoding::decode(&absolute)
        .map(|s| s.into_owned())
        .unwrap_or(absolute)
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let mut params = vec![("q", query.to_string())];
        if let Some(recency) = options.recency {
            params.push(("df", recency_param(recency).to_string()));
        }
        if let Some(language) = &options.language {
            params.push(("kl", region_param(language)));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| SearchError::Request {
                backend: NAME.into(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| SearchError::Request {
            backend: NAME.into(),
            message: format!("Failed to read response body: {}", e),
        })?;
        if !status.is_success() {
            return Err(map_status(NAME, status.as_u16(), &body));
        }

        let raw = self.parse_results(&body);
        debug!(query, count = raw.len(), "DuckDuckGo results parsed");
        Ok(normalize_results(raw, options.max_results))
    }

    fn name(&self) -> &str {
        NAME
    }
}
