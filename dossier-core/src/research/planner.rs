//! Topic decomposition into search sub-queries.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::brain::{CompletionRequest, LlmProvider};
use crate::error::PlannerError;

/// Turns a topic into a small set of complementary search queries.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn decompose(&self, topic: &str) -> Result<Vec<String>, PlannerError>;
}

const PLANNER_SYSTEM: &str = "You plan web research. Given a topic, write search-engine \
queries that together cover it from distinct angles: definitions and background, recent \
developments, criticisms and limitations, comparisons with alternatives, practical use. \
Each query must be short, specific and different from the others. \
Respond with a JSON array of strings and nothing else.";

/// Asks the generation backend for sub-queries.
pub struct LlmPlanner {
    llm: Arc<dyn LlmProvider>,
    max_sub_queries: usize,
    model: Option<String>,
    temperature: f32,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            max_sub_queries: 5,
            model: None,
            temperature: 0.2,
        }
    }

    pub fn with_max_sub_queries(mut self, max: usize) -> Self {
        self.max_sub_queries = max.max(1);
        self
    }

    /// Use this model instead of the provider's default.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn decompose(&self, topic: &str) -> Result<Vec<String>, PlannerError> {
        let prompt = format!(
            "Topic: {}\n\nWrite at most {} search queries.",
            topic.trim(),
            self.max_sub_queries
        );
        let request = CompletionRequest::new(prompt)
            .with_system(PLANNER_SYSTEM)
            .with_temperature(self.temperature)
            .with_max_tokens(512)
            .with_model(self.model.clone());

        let response = self.llm.complete(request).await?;
        let queries = parse_sub_queries(&response.text, self.max_sub_queries);
        debug!(count = queries.len(), "Planner produced sub-queries");
        if queries.is_empty() {
            return Err(PlannerError::Empty);
        }
        Ok(queries)
    }
}

/// Parse a planner reply: a JSON array if one is present, otherwise one
/// query per line. Cleans markers, drops empties and case-insensitive
/// repeats, and keeps at most `max`.
pub fn parse_sub_queries(text: &str, max: usize) -> Vec<String> {
    let candidates = parse_json_list(text).unwrap_or_else(|| {
        text.lines()
            .filter(|line| !line.trim_end().ends_with(':'))
            .filter(|line| !line.trim_start().starts_with("```"))
            .map(str::to_string)
            .collect()
    });

    let mut seen = HashSet::new();
    candidates
        .iter()
        .map(|c| clean_query(c))
        .filter(|q| !q.is_empty())
        .filter(|q| seen.insert(q.to_lowercase()))
        .take(max)
        .collect()
}

fn parse_json_list(text: &str) -> Option<Vec<String>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    let slice = &text[start..=end];
    if let Ok(list) = serde_json::from_str::<Vec<String>>(slice) {
        return Some(list);
    }
    // [{"query": "..."}]
    let values: Vec<serde_json::Value> = serde_json::from_str(slice).ok()?;
    let list: Vec<String> = values
        .iter()
        .filter_map(|v| {
            v.get("query")
                .or_else(|| v.get("q"))
                .and_then(|q| q.as_str())
                .map(str::to_string)
        })
        .collect();
    (!list.is_empty()).then_some(list)
}

fn clean_query(raw: &str) -> String {
    let mut s = raw.trim();
    // "1." / "2)" prefixes
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 && matches!(s[digits..].chars().next(), Some('.') | Some(')')) {
        s = &s[digits + 1..];
    }
    s = s.trim_start_matches(['-', '*', '\u{2022}', ' ']);
    s.trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim_end_matches(',')
        .trim_matches('"')
        .trim()
        .to_string()
}

/// Offline rule-based decomposition.
///
/// Always includes the topic itself and a recent-developments facet; adds
/// one query per side of a comparison and a practical-steps query for
/// "how to" topics.
pub struct HeuristicPlanner {
    max_sub_queries: usize,
}

impl HeuristicPlanner {
    pub fn new() -> Self {
        Self { max_sub_queries: 5 }
    }

    pub fn with_max_sub_queries(mut self, max: usize) -> Self {
        self.max_sub_queries = max.max(1);
        self
    }

    /// Split "a vs b" style topics into their sides.
    fn split_comparative(topic: &str) -> Vec<String> {
        let lower = topic.to_ascii_lowercase();
        for sep in [" vs. ", " vs ", " versus ", " compared to "] {
            if let Some(idx) = lower.find(sep) {
                let left = topic[..idx].trim();
                let right = topic[idx + sep.len()..].trim();
                return [left, right]
                    .into_iter()
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
        }
        Vec::new()
    }

    fn plan(&self, topic: &str) -> Vec<String> {
        let topic = topic.trim();
        let mut queries = vec![topic.to_string()];

        let sides = Self::split_comparative(topic);
        if sides.len() == 2 {
            queries.extend(sides.iter().cloned());
            queries.push(format!("differences between {} and {}", sides[0], sides[1]));
        }

        if topic.to_lowercase().starts_with("how") {
            queries.push(format!("{} step by step", topic));
        }

        queries.push(format!("{} recent developments", topic));

        let mut seen = HashSet::new();
        queries
            .into_iter()
            .filter(|q| seen.insert(q.to_lowercase()))
            .take(self.max_sub_queries)
            .collect()
    }
}

impl Default for HeuristicPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Planner for HeuristicPlanner {
    async fn decompose(&self, topic: &str) -> Result<Vec<String>, PlannerError> {
        let queries = self.plan(topic);
        if queries.iter().all(|q| q.trim().is_empty()) {
            return Err(PlannerError::Empty);
        }
        Ok(queries)
    }
}
