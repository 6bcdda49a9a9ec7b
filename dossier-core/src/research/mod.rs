//! Deep research pipeline.
//!
//! A topic is decomposed into sub-queries, each sub-query is searched, the
//! hits are fetched through a content cache, the resulting sources are
//! ranked against the topic and capped, and the survivors are synthesized
//! into a cited [`ResearchBrief`].

pub mod cache;
pub mod engine;
pub mod fetch;
pub mod model;
pub mod observer;
pub mod planner;
pub mod ranker;
pub mod search;
pub mod store;
pub mod synthesis;

pub use cache::{ContentCache, MemoryContentCache, SqliteContentCache};
pub use engine::{EngineLimits, ResearchEngine};
pub use fetch::{CachingFetcher, Fetcher, HttpPageLoader, PageLoader, RawPage};
pub use model::{
    Article, DetailedFinding, OutputFormat, Recency, ResearchBrief, ResearchConfig, SearchResult,
    Source, SourceType,
};
pub use observer::{NoOpObserver, ResearchObserver, ResearchStage};
pub use planner::{HeuristicPlanner, LlmPlanner, Planner};
pub use ranker::{EmbeddingRanker, Ranker};
pub use search::{SearchBackend, SearchOptions, SearchProvider, create_search_provider};
pub use store::{BriefStore, BriefSummary};
pub use synthesis::{LlmSynthesizer, SynthesisOutput, Synthesizer};
