//! Research engine: plan, search, fetch, rank, synthesize.
//!
//! One linear pipeline per call. A failed search or fetch is logged and
//! skipped; the run only fails when a whole stage has nothing to work with,
//! when planning, ranking or synthesis fails, or when it is cancelled.
//! Results are gathered with order-preserving combinators, so the final
//! source order depends on scores and discovery order, never on timing.

use futures::StreamExt;
use futures::stream;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::fetch::Fetcher;
use super::model::{
    DetailedFinding, ResearchBrief, ResearchConfig, SearchResult, Source, normalize_url,
};
use super::observer::{NoOpObserver, ResearchObserver, ResearchStage};
use super::planner::Planner;
use super::ranker::{Ranker, sort_by_relevance};
use super::search::{SearchOptions, SearchProvider};
use super::synthesis::Synthesizer;
use crate::error::{PlannerError, ResearchError};

/// Concurrency bounds for the fan-out stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    /// Sub-query searches in flight at once.
    pub search_concurrency: usize,
    /// Page fetches in flight at once.
    pub fetch_concurrency: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            search_concurrency: 3,
            fetch_concurrency: 8,
        }
    }
}

/// Results requested per sub-query: `max(1, max_sources / sub_queries)`.
pub fn per_query_budget(max_sources: usize, sub_query_count: usize) -> usize {
    (max_sources / sub_query_count.max(1)).max(1)
}

/// Drop results whose normalized URL was already seen. First occurrence
/// wins. Returns the kept results and how many were dropped.
pub fn dedupe_results(results: Vec<SearchResult>) -> (Vec<SearchResult>, usize) {
    let mut seen = HashSet::new();
    let before = results.len();
    let kept: Vec<SearchResult> = results
        .into_iter()
        .filter(|r| seen.insert(normalize_url(&r.url)))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Check that every citation indexes into a list of `source_count` sources.
pub fn validate_citations(
    findings: &[DetailedFinding],
    source_count: usize,
) -> Result<(), ResearchError> {
    for finding in findings {
        if let Some(&index) = finding.citations.iter().find(|&&i| i >= source_count) {
            return Err(ResearchError::InvalidCitation {
                finding: finding.label.clone(),
                index,
                source_count,
            });
        }
    }
    Ok(())
}

/// Await `fut` unless `cancel` fires first.
async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    stage: ResearchStage,
    fut: F,
) -> Result<F::Output, ResearchError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResearchError::Cancelled { stage: stage.to_string() }),
        out = fut => Ok(out),
    }
}

/// Orchestrates the research pipeline over its five collaborators.
pub struct ResearchEngine {
    planner: Arc<dyn Planner>,
    search: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn Fetcher>,
    ranker: Arc<dyn Ranker>,
    synthesizer: Arc<dyn Synthesizer>,
    observer: Arc<dyn ResearchObserver>,
    limits: EngineLimits,
    language: Option<String>,
}

impl ResearchEngine {
    pub fn new(
        planner: Arc<dyn Planner>,
        search: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn Fetcher>,
        ranker: Arc<dyn Ranker>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            planner,
            search,
            fetcher,
            ranker,
            synthesizer,
            observer: Arc::new(NoOpObserver),
            limits: EngineLimits::default(),
            language: None,
        }
    }

    pub fn with_limits(mut self, limits: EngineLimits) -> Self {
        self.limits = EngineLimits {
            search_concurrency: limits.search_concurrency.max(1),
            fetch_concurrency: limits.fetch_concurrency.max(1),
        };
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResearchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Language hint passed to the search backend.
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Run the full pipeline for `topic`.
    pub async fn research(
        &self,
        topic: &str,
        config: &ResearchConfig,
        cancel: &CancellationToken,
    ) -> Result<ResearchBrief, ResearchError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ResearchError::EmptyTopic);
        }
        config.validate().map_err(ResearchError::InvalidConfig)?;

        let span = info_span!(
            "research",
            topic = %topic,
            backend = self.search.name(),
            max_sources = config.max_sources
        );
        self.run(topic, config, cancel).instrument(span).await
    }

    fn enter(&self, stage: ResearchStage, cancel: &CancellationToken) -> Result<(), ResearchError> {
        if cancel.is_cancelled() {
            return Err(ResearchError::Cancelled {
                stage: stage.to_string(),
            });
        }
        debug!(%stage, "Entering stage");
        self.observer.on_stage(stage);
        Ok(())
    }

    async fn run(
        &self,
        topic: &str,
        config: &ResearchConfig,
        cancel: &CancellationToken,
    ) -> Result<ResearchBrief, ResearchError> {
        let started = Instant::now();

        // Plan
        self.enter(ResearchStage::Planning, cancel)?;
        let sub_queries = until_cancelled(cancel, ResearchStage::Planning, self.planner.decompose(topic))
            .await?
            .map_err(ResearchError::Planning)?;
        if sub_queries.is_empty() {
            return Err(ResearchError::Planning(PlannerError::Empty));
        }
        info!(count = sub_queries.len(), "Topic decomposed");
        self.observer.on_sub_queries(&sub_queries);

        // Search
        self.enter(ResearchStage::Searching, cancel)?;
        let budget = per_query_budget(config.max_sources, sub_queries.len());
        let options = SearchOptions {
            max_results: budget,
            recency: config.since,
            language: self.language.clone(),
        };
        let outcomes = until_cancelled(
            cancel,
            ResearchStage::Searching,
            stream::iter(sub_queries.iter().map(|q| self.search.search(q, &options)))
                .buffered(self.limits.search_concurrency)
                .collect::<Vec<_>>(),
        )
        .await?;

        let mut discovered = Vec::new();
        let mut search_errors = Vec::new();
        for (query, outcome) in sub_queries.iter().zip(outcomes) {
            match outcome {
                Ok(results) => {
                    debug!(query = %query, count = results.len(), "Search complete");
                    self.observer.on_search_complete(query, results.len());
                    discovered.extend(results.into_iter().take(budget));
                }
                Err(e) => {
                    warn!(query = %query, error = %e, "Search failed; skipping sub-query");
                    self.observer.on_search_failed(query, &e.to_string());
                    search_errors.push(format!("{}: {}", query, e));
                }
            }
        }
        if search_errors.len() == sub_queries.len() {
            return Err(ResearchError::AllSearchesFailed {
                attempted: sub_queries.len(),
                errors: search_errors.join("; "),
            });
        }

        let (candidates, mut duplicates) = dedupe_results(discovered);
        info!(candidates = candidates.len(), duplicates, "Search stage complete");

        // Fetch
        self.enter(ResearchStage::Fetching, cancel)?;
        let fetched = until_cancelled(
            cancel,
            ResearchStage::Fetching,
            stream::iter(candidates.iter().map(|candidate| async move {
                let result = if config.refresh {
                    self.fetcher.refetch(&candidate.url, config.use_js).await
                } else {
                    self.fetcher.fetch_content(&candidate.url, config.use_js).await
                };
                (candidate, result)
            }))
            .buffered(self.limits.fetch_concurrency)
            .collect::<Vec<_>>(),
        )
        .await?;

        let mut sources: Vec<Source> = Vec::with_capacity(fetched.len());
        let mut seen_ids = HashSet::new();
        let mut fetch_failures = 0usize;
        for (candidate, result) in fetched {
            match result {
                Ok(article) => {
                    let source = Source::from_article(article);
                    if seen_ids.insert(source.id.clone()) {
                        sources.push(source);
                    } else {
                        duplicates += 1;
                    }
                }
                Err(e) => {
                    warn!(url = %candidate.url, error = %e, "Fetch failed; skipping source");
                    self.observer.on_fetch_failed(&candidate.url, &e.to_string());
                    fetch_failures += 1;
                }
            }
        }
        if sources.is_empty() {
            return Err(ResearchError::NoSources {
                candidates: candidates.len(),
            });
        }
        let fetched_count = sources.len();

        // Rank
        self.enter(ResearchStage::Ranking, cancel)?;
        let mut ranked = until_cancelled(
            cancel,
            ResearchStage::Ranking,
            self.ranker.rank_sources(sources, topic, &sub_queries),
        )
        .await?
        .map_err(ResearchError::Ranking)?;
        for source in &mut ranked {
            source.relevance = if source.relevance.is_finite() {
                source.relevance.clamp(0.0, 1.0)
            } else {
                0.0
            };
        }
        sort_by_relevance(&mut ranked);
        let dropped = ranked.len().saturating_sub(config.max_sources);
        ranked.truncate(config.max_sources);
        self.observer.on_sources_ranked(ranked.len(), dropped);
        debug!(kept = ranked.len(), dropped, "Sources ranked and truncated");

        // Synthesize
        self.enter(ResearchStage::Synthesizing, cancel)?;
        let output = until_cancelled(
            cancel,
            ResearchStage::Synthesizing,
            self.synthesizer.synthesize(topic, &ranked, &sub_queries),
        )
        .await?
        .map_err(ResearchError::Synthesis)?;
        validate_citations(&output.findings, ranked.len())?;

        let mut metadata = BTreeMap::new();
        metadata.insert("sub_queries_failed".to_string(), json!(search_errors.len()));
        metadata.insert("fetches_failed".to_string(), json!(fetch_failures));
        metadata.insert("candidates_fetched".to_string(), json!(fetched_count));
        metadata.insert("duplicates_collapsed".to_string(), json!(duplicates));
        metadata.insert("sources_dropped_by_budget".to_string(), json!(dropped));
        metadata.insert("search_provider".to_string(), json!(self.search.name()));
        metadata.insert(
            "elapsed_ms".to_string(),
            json!(started.elapsed().as_millis() as u64),
        );

        let brief = ResearchBrief {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            executive_summary: output.executive_summary,
            findings: output.findings,
            open_questions: output.open_questions,
            sources: ranked,
            sub_queries,
            generated_at: chrono::Utc::now(),
            config: config.clone(),
            metadata,
        };

        self.observer.on_stage(ResearchStage::Complete);
        info!(
            sources = brief.sources.len(),
            findings = brief.findings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Research complete"
        );
        Ok(brief)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(url: &str) -> SearchResult {
        SearchResult {
            url: url.into(),
            title: String::new(),
            snippet: String::new(),
            domain: String::new(),
        }
    }

    #[test]
    fn test_per_query_budget() {
        assert_eq!(per_query_budget(12, 5), 2);
        assert_eq!(per_query_budget(12, 3), 4);
        assert_eq!(per_query_budget(2, 5), 1);
        assert_eq!(per_query_budget(10, 0), 10);
    }

    #[test]
    fn test_dedupe_results_first_wins() {
        let (kept, dropped) = dedupe_results(vec![
            hit("https://a.com/x"),
            hit("https://b.com/y"),
            hit("https://A.com/x/"),
            hit("https://a.com/x#top"),
        ]);
        assert_eq!(dropped, 2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].url, "https://a.com/x");
    }

    #[test]
    fn test_validate_citations() {
        let finding = |citations: Vec<usize>| DetailedFinding {
            label: "f".into(),
            content: "c".into(),
            citations,
            confidence: 0.5,
        };
        assert!(validate_citations(&[finding(vec![0, 1])], 2).is_ok());
        assert!(matches!(
            validate_citations(&[finding(vec![0]), finding(vec![2])], 2),
            Err(ResearchError::InvalidCitation { index: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_until_cancelled() {
        let token = CancellationToken::new();
        assert_eq!(
            until_cancelled(&token, ResearchStage::Ranking, async { 7 })
                .await
                .unwrap(),
            7
        );
        token.cancel();
        let err = until_cancelled(&token, ResearchStage::Ranking, async { 7 })
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::Cancelled { stage } if stage == "ranking"));
    }
}
