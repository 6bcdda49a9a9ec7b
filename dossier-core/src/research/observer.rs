//! Progress callbacks for a research run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStage {
    Planning,
    Searching,
    Fetching,
    Ranking,
    Synthesizing,
    Complete,
}

impl fmt::Display for ResearchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResearchStage::Planning => "planning",
            ResearchStage::Searching => "searching",
            ResearchStage::Fetching => "fetching",
            ResearchStage::Ranking => "ranking",
            ResearchStage::Synthesizing => "synthesizing",
            ResearchStage::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Receives stage transitions and per-item skips. All methods default to
/// doing nothing; callers override what they display.
pub trait ResearchObserver: Send + Sync {
    /// Called when the pipeline enters a stage.
    fn on_stage(&self, _stage: ResearchStage) {}
    /// Called once the planner has produced sub-queries.
    fn on_sub_queries(&self, _queries: &[String]) {}
    /// Called when one sub-query's search succeeds.
    fn on_search_complete(&self, _query: &str, _results: usize) {}
    /// Called when one sub-query's search fails and is skipped.
    fn on_search_failed(&self, _query: &str, _error: &str) {}
    /// Called when fetching one URL fails and it is skipped.
    fn on_fetch_failed(&self, _url: &str, _error: &str) {}
    /// Called after ranking with the number of sources kept and dropped.
    fn on_sources_ranked(&self, _kept: usize, _dropped: usize) {}
}

/// Observer that ignores everything.
pub struct NoOpObserver;

impl ResearchObserver for NoOpObserver {}
