//! Brief synthesis: ranked sources in, summary and cited findings out.
//!
//! Sources are shown to the model numbered from 1, the way a reader would
//! cite them. Citations come back in that numbering and are converted to
//! zero-based positions into the source list; a citation that does not name
//! a shown source is rejected, never clamped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

use crate::brain::{CompletionRequest, LlmProvider};
use crate::error::SynthesisError;
use crate::research::fetch::clean::truncate_chars;
use crate::research::model::{DetailedFinding, Source};

/// What a synthesizer produces. The engine wraps it into a brief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOutput {
    pub executive_summary: String,
    pub findings: Vec<DetailedFinding>,
    pub open_questions: Vec<String>,
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// `sources` are ordered by relevance; findings cite positions in it.
    async fn synthesize(
        &self,
        topic: &str,
        sources: &[Source],
        sub_queries: &[String],
    ) -> Result<SynthesisOutput, SynthesisError>;
}

const SYNTHESIS_SYSTEM: &str = "You are a meticulous research analyst. Write a research brief \
using ONLY the numbered sources provided. Every finding must cite the sources that support it \
by their numbers. Do not invent sources or facts. Note disagreements between sources where \
they exist. Reply with a single JSON object and no other text.";

const RESPONSE_SHAPE: &str = r#"{
  "executive_summary": "3-5 sentences answering the topic",
  "findings": [
    {"label": "short section title", "content": "one or two paragraphs", "citations": [1, 3], "confidence": 0.8}
  ],
  "open_questions": ["what the sources leave unanswered"]
}"#;

/// Synthesizer backed by the generation backend.
pub struct LlmSynthesizer {
    llm: Arc<dyn LlmProvider>,
    model: Option<String>,
    max_excerpt_chars: usize,
    max_tokens: usize,
    temperature: f32,
}

impl LlmSynthesizer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            model: None,
            max_excerpt_chars: 1500,
            max_tokens: 4096,
            temperature: 0.2,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_max_excerpt_chars(mut self, chars: usize) -> Self {
        self.max_excerpt_chars = chars;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Build the user prompt with sources numbered `[1]..[n]`.
pub fn build_prompt(
    topic: &str,
    sources: &[Source],
    sub_queries: &[String],
    max_excerpt_chars: usize,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Topic: {}\n", topic.trim());

    if !sub_queries.is_empty() {
        prompt.push_str("Research angles explored:\n");
        for q in sub_queries {
            let _ = writeln!(prompt, "- {}", q);
        }
        prompt.push('\n');
    }

    let _ = writeln!(prompt, "Sources ({} total):\n", sources.len());
    for (i, source) in sources.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "[{}] {}\nURL: {}\nType: {}\n{}\n",
            i + 1,
            source.title,
            source.url,
            source.source_type,
            truncate_chars(&source.content, max_excerpt_chars)
        );
    }

    let _ = write!(
        prompt,
        "Cite sources by number, between 1 and {}. Respond in exactly this JSON shape:\n{}",
        sources.len(),
        RESPONSE_SHAPE
    );
    prompt
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(
        &self,
        topic: &str,
        sources: &[Source],
        sub_queries: &[String],
    ) -> Result<SynthesisOutput, SynthesisError> {
        if sources.is_empty() {
            return Err(SynthesisError::NoSources);
        }
        let request = CompletionRequest::new(build_prompt(
            topic,
            sources,
            sub_queries,
            self.max_excerpt_chars,
        ))
        .with_system(SYNTHESIS_SYSTEM)
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens)
        .with_model(self.model.clone());

        let response = self.llm.complete(request).await?;
        debug!(
            output_tokens = response.usage.output_tokens,
            finish_reason = response.finish_reason.as_deref().unwrap_or(""),
            "Synthesis response received"
        );
        parse_synthesis(&response.text, sources.len())
    }
}

#[derive(Deserialize)]
struct RawSynthesis {
    #[serde(default, alias = "summary")]
    executive_summary: String,
    #[serde(default)]
    findings: Vec<RawFinding>,
    #[serde(default)]
    open_questions: Vec<String>,
}

#[derive(Deserialize)]
struct RawFinding {
    #[serde(default, alias = "title", alias = "heading")]
    label: String,
    #[serde(default, alias = "text", alias = "body")]
    content: String,
    #[serde(default)]
    citations: Vec<serde_json::Value>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// The outermost `{...}` in a reply, ignoring code fences and prose.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn citation_number(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().trim_matches(['[', ']']).parse().ok(),
        _ => None,
    }
}

/// Parse and validate a synthesis reply against `source_count` sources.
pub fn parse_synthesis(text: &str, source_count: usize) -> Result<SynthesisOutput, SynthesisError> {
    let json = extract_json_object(text).ok_or_else(|| SynthesisError::Parse {
        message: "no JSON object in response".into(),
    })?;
    let raw: RawSynthesis = serde_json::from_str(json).map_err(|e| SynthesisError::Parse {
        message: e.to_string(),
    })?;

    let executive_summary = raw.executive_summary.trim().to_string();
    if executive_summary.is_empty() {
        return Err(SynthesisError::Parse {
            message: "executive summary is empty".into(),
        });
    }

    let mut findings = Vec::with_capacity(raw.findings.len());
    for finding in raw.findings {
        let label = finding.label.trim().to_string();
        let content = finding.content.trim().to_string();
        if label.is_empty() && content.is_empty() {
            continue;
        }

        let mut citations: Vec<usize> = Vec::with_capacity(finding.citations.len());
        for value in &finding.citations {
            let number = citation_number(value).ok_or_else(|| SynthesisError::Parse {
                message: format!("finding '{}' has a non-numeric citation: {}", label, value),
            })?;
            if number < 1 || number as u64 > source_count as u64 {
                return Err(SynthesisError::InvalidCitation {
                    finding: label,
                    citation: number,
                    source_count,
                });
            }
            let index = (number - 1) as usize;
            if !citations.contains(&index) {
                citations.push(index);
            }
        }

        let confidence = finding
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);

        findings.push(DetailedFinding {
            label,
            content,
            citations,
            confidence,
        });
    }

    let open_questions = raw
        .open_questions
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();

    Ok(SynthesisOutput {
        executive_summary,
        findings,
        open_questions,
    })
}
