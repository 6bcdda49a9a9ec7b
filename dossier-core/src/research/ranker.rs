//! Relevance ranking of fetched sources.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::embeddings::{Embedder, cosine_similarity};
use crate::error::RankError;
use crate::research::fetch::clean::truncate_chars;
use crate::research::model::Source;

/// Weight of the best sub-query match relative to the topic match.
pub const SUB_QUERY_WEIGHT: f64 = 0.8;

/// Scores sources and returns them most relevant first. Never drops any.
#[async_trait]
pub trait Ranker: Send + Sync {
    async fn rank_sources(
        &self,
        sources: Vec<Source>,
        topic: &str,
        sub_queries: &[String],
    ) -> Result<Vec<Source>, RankError>;
}

/// Sort by relevance, descending. Stable, so ties keep their input order.
pub fn sort_by_relevance(sources: &mut [Source]) {
    sources.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
}

/// Cosine similarity between embedded topic/sub-queries and each source.
pub struct EmbeddingRanker {
    embedder: Arc<dyn Embedder>,
    max_embed_chars: usize,
}

impl EmbeddingRanker {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            max_embed_chars: 2000,
        }
    }

    pub fn with_max_embed_chars(mut self, max_embed_chars: usize) -> Self {
        self.max_embed_chars = max_embed_chars;
        self
    }

    fn source_text(&self, source: &Source) -> String {
        format!(
            "{}\n{}",
            source.title,
            truncate_chars(&source.content, self.max_embed_chars)
        )
    }
}

#[async_trait]
impl Ranker for EmbeddingRanker {
    async fn rank_sources(
        &self,
        mut sources: Vec<Source>,
        topic: &str,
        sub_queries: &[String],
    ) -> Result<Vec<Source>, RankError> {
        if sources.is_empty() {
            return Ok(sources);
        }

        // One batch: topic, sub-queries, then sources.
        let mut texts = Vec::with_capacity(1 + sub_queries.len() + sources.len());
        texts.push(topic.to_string());
        texts.extend(sub_queries.iter().cloned());
        texts.extend(sources.iter().map(|s| self.source_text(s)));

        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(RankError::Embedding(
                crate::error::EmbeddingError::CountMismatch {
                    provider: self.embedder.provider_name().to_string(),
                    expected: texts.len(),
                    actual: vectors.len(),
                },
            ));
        }

        let (topic_vec, rest) = vectors.split_at(1);
        let (query_vecs, source_vecs) = rest.split_at(sub_queries.len());
        let topic_vec = &topic_vec[0];

        for (source, vector) in sources.iter_mut().zip(source_vecs) {
            let topic_score = cosine_similarity(topic_vec, vector) as f64;
            let facet_score = query_vecs
                .iter()
                .map(|q| cosine_similarity(q, vector) as f64)
                .fold(0.0_f64, f64::max);
            let score = topic_score.max(SUB_QUERY_WEIGHT * facet_score);
            source.relevance = if score.is_finite() {
                score.clamp(0.0, 1.0)
            } else {
                0.0
            };
        }

        sort_by_relevance(&mut sources);
        debug!(
            count = sources.len(),
            top = sources.first().map(|s| s.relevance).unwrap_or_default(),
            "Sources ranked"
        );
        Ok(sources)
    }
}
