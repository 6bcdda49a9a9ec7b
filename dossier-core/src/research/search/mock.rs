//! Deterministic offline search backend.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{SearchOptions, SearchProvider, normalize_results};
use crate::error::SearchError;
use crate::research::model::SearchResult;

/// Canned search results for tests and `--search mock` runs.
///
/// Without scripted results, each query yields three stable
/// `https://example.com/...` hits derived from the query text.
pub struct MockSearchProvider {
    scripted: HashMap<String, Vec<SearchResult>>,
    failing: HashSet<String>,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self {
            scripted: HashMap::new(),
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Return exactly these results for `query`.
    pub fn with_results(mut self, query: &str, urls: &[&str]) -> Self {
        let results = urls
            .iter()
            .enumerate()
            .map(|(i, url)| SearchResult {
                url: url.to_string(),
                title: format!("{} result {}", query, i + 1),
                snippet: format!("About {}", query),
                domain: String::new(),
            })
            .collect();
        self.scripted.insert(query.to_string(), results);
        self
    }

    /// Fail every search for `query`.
    pub fn failing_on(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queries received, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn canned(query: &str) -> Vec<SearchResult> {
        let slug: String = query
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        (1..=3)
            .map(|i| SearchResult {
                url: format!("https://example.com/{}/{}", slug, i),
                title: format!("{} ({})", query, i),
                snippet: format!("Canned result {} for {}", i, query),
                domain: String::new(),
            })
            .collect()
    }
}

impl Default for MockSearchProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());

        if self.failing.contains(query) {
            return Err(SearchError::Request {
                backend: "mock".into(),
                message: format!("scripted failure for '{}'", query),
            });
        }
        let raw = self
            .scripted
            .get(query)
            .cloned()
            .unwrap_or_else(|| Self::canned(query));
        Ok(normalize_results(raw, options.max_results))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
