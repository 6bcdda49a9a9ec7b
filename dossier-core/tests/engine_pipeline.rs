//! Integration tests for the research pipeline.
//!
//! Every collaborator is a deterministic in-process fake, so these tests
//! exercise orchestration only: budgets, dedup, failure policy, ordering,
//! citation checks and cancellation.

use async_trait::async_trait;
use chrono::Utc;
use dossier_core::brain::MockLlmProvider;
use dossier_core::embeddings::LocalEmbedder;
use dossier_core::error::{FetchError, PlannerError, RankError, ResearchError, SynthesisError};
use dossier_core::research::cache::MemoryContentCache;
use dossier_core::research::model::{Article, DetailedFinding, domain_of, normalize_url};
use dossier_core::research::ranker::sort_by_relevance;
use dossier_core::research::{
    CachingFetcher, EmbeddingRanker, EngineLimits, Fetcher, LlmSynthesizer, PageLoader, Planner,
    RawPage, Ranker, ResearchConfig, ResearchEngine, ResearchObserver, ResearchStage,
    SearchProvider, Source, SynthesisOutput, Synthesizer,
};
use dossier_core::research::search::MockSearchProvider;
use pretty_assertions::assert_eq;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ── Fakes ───────────────────────────────────────────────────────────────

struct StaticPlanner(Vec<String>);

impl StaticPlanner {
    fn new(queries: &[&str]) -> Arc<Self> {
        Arc::new(Self(queries.iter().map(|q| q.to_string()).collect()))
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn decompose(&self, _topic: &str) -> Result<Vec<String>, PlannerError> {
        Ok(self.0.clone())
    }
}

struct FailingPlanner;

#[async_trait]
impl Planner for FailingPlanner {
    async fn decompose(&self, _topic: &str) -> Result<Vec<String>, PlannerError> {
        Err(PlannerError::Empty)
    }
}

/// Serves generated content for any URL, except those marked broken.
#[derive(Default)]
struct FakeFetcher {
    broken: HashSet<String>,
    delays_ms: HashMap<String, u64>,
    redirects: HashMap<String, String>,
    hang: bool,
    fetches: AtomicUsize,
    refetches: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl FakeFetcher {
    fn new() -> Self {
        Self::default()
    }

    fn broken(mut self, url: &str) -> Self {
        self.broken.insert(url.to_string());
        self
    }

    fn delay(mut self, url: &str, ms: u64) -> Self {
        self.delays_ms.insert(url.to_string(), ms);
        self
    }

    /// Serve `to` as the final URL when `from` is requested.
    fn redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(from.to_string(), to.to_string());
        self
    }

    fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    async fn load(&self, url: &str) -> Result<Article, FetchError> {
        self.seen.lock().unwrap().push(url.to_string());
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(ms) = self.delays_ms.get(url) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        if self.broken.contains(url) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 503,
            });
        }
        let final_url = self.redirects.get(url).map(String::as_str).unwrap_or(url);
        Ok(Article {
            url: normalize_url(final_url),
            title: format!("Page {}", final_url),
            domain: domain_of(final_url).unwrap_or_default(),
            content: format!("Readable content served for {} with enough words in it.", final_url),
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch_content(&self, url: &str, _use_js: bool) -> Result<Article, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.load(url).await
    }

    async fn refetch(&self, url: &str, _use_js: bool) -> Result<Article, FetchError> {
        self.refetches.fetch_add(1, Ordering::SeqCst);
        self.load(url).await
    }
}

/// Assigns fixed scores by URL; unlisted URLs get 0.5.
struct ScriptedRanker(HashMap<String, f64>);

impl ScriptedRanker {
    fn new(scores: &[(&str, f64)]) -> Arc<Self> {
        Arc::new(Self(
            scores.iter().map(|(u, s)| (u.to_string(), *s)).collect(),
        ))
    }
}

#[async_trait]
impl Ranker for ScriptedRanker {
    async fn rank_sources(
        &self,
        mut sources: Vec<Source>,
        _topic: &str,
        _sub_queries: &[String],
    ) -> Result<Vec<Source>, RankError> {
        for s in &mut sources {
            s.relevance = self.0.get(&s.url).copied().unwrap_or(0.5);
        }
        sort_by_relevance(&mut sources);
        Ok(sources)
    }
}

/// One finding citing every source, plus an optional extra citation.
#[derive(Default)]
struct CitingSynthesizer {
    extra_citation: Option<usize>,
    received: Mutex<Vec<String>>,
}

impl CitingSynthesizer {
    fn citing_out_of_range(index: usize) -> Self {
        Self {
            extra_citation: Some(index),
            ..Default::default()
        }
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for CitingSynthesizer {
    async fn synthesize(
        &self,
        topic: &str,
        sources: &[Source],
        _sub_queries: &[String],
    ) -> Result<SynthesisOutput, SynthesisError> {
        *self.received.lock().unwrap() = sources.iter().map(|s| s.url.clone()).collect();
        let mut citations: Vec<usize> = (0..sources.len()).collect();
        citations.extend(self.extra_citation);
        Ok(SynthesisOutput {
            executive_summary: format!("Summary of {}", topic),
            findings: vec![DetailedFinding {
                label: "Overview".into(),
                content: "Everything.".into(),
                citations,
                confidence: 0.7,
            }],
            open_questions: vec!["What next?".into()],
        })
    }
}

#[derive(Default)]
struct RecordingObserver {
    stages: Mutex<Vec<ResearchStage>>,
    search_failures: AtomicUsize,
    fetch_failures: AtomicUsize,
}

impl ResearchObserver for RecordingObserver {
    fn on_stage(&self, stage: ResearchStage) {
        self.stages.lock().unwrap().push(stage);
    }

    fn on_search_failed(&self, _query: &str, _error: &str) {
        self.search_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_fetch_failed(&self, _url: &str, _error: &str) {
        self.fetch_failures.fetch_add(1, Ordering::SeqCst);
    }
}

fn config(max_sources: usize) -> ResearchConfig {
    ResearchConfig {
        max_sources,
        ..Default::default()
    }
}

fn engine(
    planner: Arc<dyn Planner>,
    search: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn Fetcher>,
    ranker: Arc<dyn Ranker>,
    synthesizer: Arc<dyn Synthesizer>,
) -> ResearchEngine {
    ResearchEngine::new(planner, search, fetcher, ranker, synthesizer)
}

// ── Happy path ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_end_to_end_with_real_ranker_and_llm_synthesizer() {
    let search = Arc::new(
        MockSearchProvider::new()
            .with_results("tokio runtime", &["https://tokio.rs/a", "https://blog.rust-lang.org/b"])
            .with_results("async-std", &["https://github.com/async-rs/async-std"]),
    );
    let llm = Arc::new(MockLlmProvider::with_response(
        r#"{"executive_summary": "Tokio leads.", "findings": [
            {"label": "Runtimes", "content": "Tokio is common.", "citations": [1, 2], "confidence": 0.9}
        ], "open_questions": ["Is async-std maintained?"]}"#,
    ));
    let observer = Arc::new(RecordingObserver::default());
    let engine = engine(
        StaticPlanner::new(&["tokio runtime", "async-std"]),
        search.clone(),
        Arc::new(FakeFetcher::new()),
        Arc::new(EmbeddingRanker::new(Arc::new(LocalEmbedder::default()))),
        Arc::new(LlmSynthesizer::new(llm.clone())),
    )
    .with_observer(observer.clone());

    let cfg = config(10);
    let brief = engine
        .research("  rust async runtimes ", &cfg, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(brief.topic, "rust async runtimes");
    assert_eq!(brief.executive_summary, "Tokio leads.");
    assert_eq!(brief.sub_queries, vec!["tokio runtime", "async-std"]);
    assert_eq!(brief.sources.len(), 3);
    assert_eq!(brief.config, cfg);
    assert_eq!(brief.findings[0].citations, vec![0, 1]);
    assert!(
        brief
            .sources
            .windows(2)
            .all(|w| w[0].relevance >= w[1].relevance)
    );
    assert!(brief.sources.iter().all(|s| (0.0..=1.0).contains(&s.relevance)));
    let ids: HashSet<_> = brief.sources.iter().map(|s| s.id.clone()).collect();
    assert_eq!(ids.len(), brief.sources.len());
    assert_eq!(brief.metadata["search_provider"], "mock");
    assert_eq!(brief.metadata["sub_queries_failed"], 0);
    assert_eq!(llm.call_count(), 1);
    assert_eq!(
        *observer.stages.lock().unwrap(),
        vec![
            ResearchStage::Planning,
            ResearchStage::Searching,
            ResearchStage::Fetching,
            ResearchStage::Ranking,
            ResearchStage::Synthesizing,
            ResearchStage::Complete,
        ]
    );
}

// ── Budget and dedup ────────────────────────────────────────────────────

#[tokio::test]
async fn test_per_query_budget_limits_each_search() {
    // Canned mock results give three hits per query; budget is 5 / 2 = 2.
    let search = Arc::new(MockSearchProvider::new());
    let fetcher = Arc::new(FakeFetcher::new());
    let engine = engine(
        StaticPlanner::new(&["alpha", "beta"]),
        search.clone(),
        fetcher.clone(),
        ScriptedRanker::new(&[]),
        Arc::new(CitingSynthesizer::default()),
    );

    let brief = engine
        .research("topic", &config(5), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 4);
    assert_eq!(brief.sources.len(), 4);
    assert_eq!(search.call_count(), 2);
}

#[tokio::test]
async fn test_same_url_from_two_queries_is_one_source() {
    let search = Arc::new(
        MockSearchProvider::new()
            .with_results("a", &["https://shared.com/page", "https://only-a.com/x"])
            .with_results("b", &["https://shared.com/page/", "https://only-b.com/y"]),
    );
    let fetcher = Arc::new(FakeFetcher::new());
    let engine = engine(
        StaticPlanner::new(&["a", "b"]),
        search,
        fetcher.clone(),
        ScriptedRanker::new(&[]),
        Arc::new(CitingSynthesizer::default()),
    );

    let brief = engine
        .research("topic", &config(10), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(brief.sources.len(), 3);
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 3);
    assert_eq!(brief.metadata["duplicates_collapsed"], 1);
    let shared = brief
        .sources
        .iter()
        .filter(|s| s.url == "https://shared.com/page")
        .count();
    assert_eq!(shared, 1);
}

#[tokio::test]
async fn test_redirects_to_one_page_collapse_after_fetch() {
    let search = Arc::new(
        MockSearchProvider::new()
            .with_results("a", &["https://shared.com/page?utm_source=a", "https://only-a.com/x"])
            .with_results("b", &["http://shared.com/page"]),
    );
    let fetcher = Arc::new(
        FakeFetcher::new()
            .redirect("https://shared.com/page?utm_source=a", "https://shared.com/page")
            .redirect("http://shared.com/page", "https://shared.com/page"),
    );
    let engine = engine(
        StaticPlanner::new(&["a", "b"]),
        search,
        fetcher.clone(),
        ScriptedRanker::new(&[]),
        Arc::new(CitingSynthesizer::default()),
    );

    let brief = engine
        .research("topic", &config(10), &CancellationToken::new())
        .await
        .unwrap();
    // Both distinct search URLs are fetched; the shared landing page is kept once.
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 3);
    assert_eq!(brief.metadata["duplicates_collapsed"], 1);
    assert_eq!(brief.metadata["candidates_fetched"], 2);
    let shared = brief
        .sources
        .iter()
        .filter(|s| s.url == "https://shared.com/page")
        .count();
    assert_eq!(shared, 1);
    let ids: HashSet<_> = brief.sources.iter().map(|s| s.id.clone()).collect();
    assert_eq!(ids.len(), brief.sources.len());
}

#[tokio::test]
async fn test_rank_then_truncate_keeps_highest() {
    // Three sub-queries with a cap of two: one candidate each, one dropped.
    let search = Arc::new(
        MockSearchProvider::new()
            .with_results("q1", &["https://s.com/low"])
            .with_results("q2", &["https://s.com/high"])
            .with_results("q3", &["https://s.com/mid"]),
    );
    let synth = Arc::new(CitingSynthesizer::default());
    let engine = engine(
        StaticPlanner::new(&["q1", "q2", "q3"]),
        search,
        Arc::new(FakeFetcher::new()),
        ScriptedRanker::new(&[
            ("https://s.com/low", 0.2),
            ("https://s.com/high", 0.9),
            ("https://s.com/mid", 0.5),
        ]),
        synth.clone(),
    );

    let brief = engine
        .research("topic", &config(2), &CancellationToken::new())
        .await
        .unwrap();
    let scores: Vec<f64> = brief.sources.iter().map(|s| s.relevance).collect();
    assert_eq!(scores, vec![0.9, 0.5]);
    assert_eq!(
        synth.received(),
        vec!["https://s.com/high".to_string(), "https://s.com/mid".to_string()]
    );
    assert_eq!(brief.metadata["sources_dropped_by_budget"], 1);
    assert_eq!(brief.metadata["candidates_fetched"], 3);
}

#[tokio::test]
async fn test_order_ignores_fetch_completion_timing() {
    let urls = ["https://t.com/1", "https://t.com/2", "https://t.com/3"];
    let run = |fetcher: FakeFetcher| {
        let search = Arc::new(MockSearchProvider::new().with_results("q", &urls));
        let synth = Arc::new(CitingSynthesizer::default());
        let engine = engine(
            StaticPlanner::new(&["q"]),
            search,
            Arc::new(fetcher),
            // All ties: order falls back to discovery order.
            ScriptedRanker::new(&[]),
            synth,
        );
        async move {
            engine
                .research("topic", &config(10), &CancellationToken::new())
                .await
                .unwrap()
        }
    };

    let slow_first = run(
        FakeFetcher::new()
            .delay(urls[0], 60)
            .delay(urls[1], 30)
            .delay(urls[2], 0),
    )
    .await;
    let fast_first = run(FakeFetcher::new()).await;

    let order = |b: &dossier_core::ResearchBrief| {
        b.sources.iter().map(|s| s.url.clone()).collect::<Vec<_>>()
    };
    assert_eq!(order(&slow_first), urls.to_vec());
    assert_eq!(order(&slow_first), order(&fast_first));
}

// ── Failure policy ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_one_failed_search_is_skipped() {
    let search = Arc::new(MockSearchProvider::new().failing_on("b"));
    let observer = Arc::new(RecordingObserver::default());
    let engine = engine(
        StaticPlanner::new(&["a", "b", "c"]),
        search.clone(),
        Arc::new(FakeFetcher::new()),
        ScriptedRanker::new(&[]),
        Arc::new(CitingSynthesizer::default()),
    )
    .with_observer(observer.clone());

    let brief = engine
        .research("topic", &config(9), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(search.call_count(), 3);
    assert_eq!(brief.sources.len(), 6);
    assert_eq!(brief.metadata["sub_queries_failed"], 1);
    assert_eq!(observer.search_failures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_all_searches_failed() {
    let search = Arc::new(MockSearchProvider::new().failing_on("a").failing_on("b"));
    let engine = engine(
        StaticPlanner::new(&["a", "b"]),
        search,
        Arc::new(FakeFetcher::new()),
        ScriptedRanker::new(&[]),
        Arc::new(CitingSynthesizer::default()),
    );
    let err = engine
        .research("topic", &config(4), &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        ResearchError::AllSearchesFailed { attempted, errors } => {
            assert_eq!(attempted, 2);
            assert!(errors.contains("a:"));
            assert!(errors.contains("b:"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_planner_failure_makes_no_searches() {
    let search = Arc::new(MockSearchProvider::new());
    let engine = engine(
        Arc::new(FailingPlanner),
        search.clone(),
        Arc::new(FakeFetcher::new()),
        ScriptedRanker::new(&[]),
        Arc::new(CitingSynthesizer::default()),
    );
    let err = engine
        .research("topic", &config(4), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ResearchError::Planning(_)));
    assert_eq!(search.call_count(), 0);
}

#[tokio::test]
async fn test_failed_fetches_are_skipped_until_none_left() {
    let search = Arc::new(
        MockSearchProvider::new().with_results("q", &["https://x.com/ok", "https://x.com/dead"]),
    );
    let observer = Arc::new(RecordingObserver::default());
    let engine = engine(
        StaticPlanner::new(&["q"]),
        search,
        Arc::new(FakeFetcher::new().broken("https://x.com/dead")),
        ScriptedRanker::new(&[]),
        Arc::new(CitingSynthesizer::default()),
    )
    .with_observer(observer.clone());
    let brief = engine
        .research("topic", &config(5), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(brief.sources.len(), 1);
    assert_eq!(brief.metadata["fetches_failed"], 1);
    assert_eq!(observer.fetch_failures.load(Ordering::SeqCst), 1);

    let search = Arc::new(MockSearchProvider::new().with_results("q", &["https://x.com/dead"]));
    let engine = self::engine(
        StaticPlanner::new(&["q"]),
        search,
        Arc::new(FakeFetcher::new().broken("https://x.com/dead")),
        ScriptedRanker::new(&[]),
        Arc::new(CitingSynthesizer::default()),
    );
    let err = engine
        .research("topic", &config(5), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ResearchError::NoSources { candidates: 1 }));
}

#[tokio::test]
async fn test_out_of_range_citation_is_rejected() {
    let search = Arc::new(MockSearchProvider::new().with_results("q", &["https://c.com/1"]));
    let engine = engine(
        StaticPlanner::new(&["q"]),
        search,
        Arc::new(FakeFetcher::new()),
        ScriptedRanker::new(&[]),
        Arc::new(CitingSynthesizer::citing_out_of_range(5)),
    );
    let err = engine
        .research("topic", &config(5), &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        ResearchError::InvalidCitation {
            index,
            source_count,
            ..
        } => {
            assert_eq!(index, 5);
            assert_eq!(source_count, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_synthesis_failure_is_fatal() {
    let search = Arc::new(MockSearchProvider::new().with_results("q", &["https://c.com/1"]));
    let engine = engine(
        StaticPlanner::new(&["q"]),
        search,
        Arc::new(FakeFetcher::new()),
        ScriptedRanker::new(&[]),
        Arc::new(LlmSynthesizer::new(Arc::new(MockLlmProvider::failing(
            "backend down",
        )))),
    );
    let err = engine
        .research("topic", &config(5), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ResearchError::Synthesis(SynthesisError::Llm(_))));
}

#[tokio::test]
async fn test_invalid_input() {
    let engine = engine(
        StaticPlanner::new(&["q"]),
        Arc::new(MockSearchProvider::new()),
        Arc::new(FakeFetcher::new()),
        ScriptedRanker::new(&[]),
        Arc::new(CitingSynthesizer::default()),
    );
    let token = CancellationToken::new();
    assert!(matches!(
        engine.research("   ", &config(5), &token).await,
        Err(ResearchError::EmptyTopic)
    ));
    assert!(matches!(
        engine.research("topic", &config(0), &token).await,
        Err(ResearchError::InvalidConfig(_))
    ));
}

// ── Cache and refresh ───────────────────────────────────────────────────

struct CountingLoader {
    calls: AtomicUsize,
}

#[async_trait]
impl PageLoader for CountingLoader {
    async fn load(&self, url: &str) -> Result<RawPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RawPage {
            final_url: url.to_string(),
            content_type: "text/html".into(),
            body: format!(
                "<html><head><title>{url}</title></head><body><p>A paragraph long enough to \
                 be kept by the cleaner for {url}.</p></body></html>"
            ),
        })
    }

    fn name(&self) -> &str {
        "counting"
    }
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let loader = Arc::new(CountingLoader {
        calls: AtomicUsize::new(0),
    });
    let fetcher = Arc::new(CachingFetcher::new(
        Arc::new(MemoryContentCache::new()),
        loader.clone(),
    ));
    let engine = engine(
        StaticPlanner::new(&["q"]),
        Arc::new(MockSearchProvider::new().with_results("q", &["https://c.com/1", "https://c.com/2"])),
        fetcher,
        ScriptedRanker::new(&[]),
        Arc::new(CitingSynthesizer::default()),
    );

    let token = CancellationToken::new();
    let first = engine.research("topic", &config(5), &token).await.unwrap();
    assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    let second = engine.research("topic", &config(5), &token).await.unwrap();
    assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    assert_eq!(first.sources[0].content, second.sources[0].content);

    let refresh = ResearchConfig {
        refresh: true,
        ..config(5)
    };
    engine.research("topic", &refresh, &token).await.unwrap();
    assert_eq!(loader.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_refresh_calls_refetch() {
    let fetcher = Arc::new(FakeFetcher::new());
    let engine = engine(
        StaticPlanner::new(&["q"]),
        Arc::new(MockSearchProvider::new().with_results("q", &["https://r.com/1"])),
        fetcher.clone(),
        ScriptedRanker::new(&[]),
        Arc::new(CitingSynthesizer::default()),
    );
    let cfg = ResearchConfig {
        refresh: true,
        ..config(5)
    };
    engine
        .research("topic", &cfg, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fetcher.refetches.load(Ordering::SeqCst), 1);
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 0);
}

// ── Cancellation ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cancelled_before_start() {
    let search = Arc::new(MockSearchProvider::new());
    let engine = engine(
        StaticPlanner::new(&["q"]),
        search.clone(),
        Arc::new(FakeFetcher::new()),
        ScriptedRanker::new(&[]),
        Arc::new(CitingSynthesizer::default()),
    );
    let token = CancellationToken::new();
    token.cancel();
    let err = engine.research("topic", &config(5), &token).await.unwrap_err();
    assert!(matches!(err, ResearchError::Cancelled { ref stage } if stage == "planning"));
    assert_eq!(search.call_count(), 0);
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_fetches() {
    let fetcher = Arc::new(FakeFetcher::new().hanging());
    let synth = Arc::new(CitingSynthesizer::default());
    let engine = engine(
        StaticPlanner::new(&["q"]),
        Arc::new(MockSearchProvider::new()),
        fetcher.clone(),
        ScriptedRanker::new(&[]),
        synth.clone(),
    )
    .with_limits(EngineLimits {
        search_concurrency: 1,
        fetch_concurrency: 2,
    });

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        engine.research("topic", &config(6), &token),
    )
    .await
    .expect("cancellation should be prompt");
    assert!(matches!(result, Err(ResearchError::Cancelled { ref stage }) if stage == "fetching"));
    // Bounded pool: at most two fetches were ever started.
    assert!(fetcher.seen.lock().unwrap().len() <= 2);
    assert!(synth.received().is_empty());
}
