//! Brief rendering for the terminal and files.

use dossier_core::ResearchBrief;
use dossier_core::research::OutputFormat;
use std::fmt::Write as _;

const WRAP_WIDTH: usize = 88;

pub fn render(brief: &ResearchBrief, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Markdown => Ok(markdown(brief)),
        OutputFormat::Json => json(brief),
    }
}

pub fn json(brief: &ResearchBrief) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(brief)?)
}

/// Render a brief as Markdown. Citations are shown 1-based to match the
/// numbered source list.
pub fn markdown(brief: &ResearchBrief) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", brief.topic);
    let _ = writeln!(
        out,
        "_Generated {} · {} sources · model {}_\n",
        brief.generated_at.format("%Y-%m-%d %H:%M UTC"),
        brief.sources.len(),
        brief.config.model
    );

    out.push_str("## Executive summary\n\n");
    let _ = writeln!(out, "{}\n", textwrap::fill(brief.executive_summary.trim(), WRAP_WIDTH));

    if !brief.findings.is_empty() {
        out.push_str("## Findings\n\n");
        for finding in &brief.findings {
            let cites: Vec<String> = finding
                .citations
                .iter()
                .map(|i| format!("[{}]", i + 1))
                .collect();
            let _ = writeln!(
                out,
                "### {} {}\n",
                finding.label,
                cites.join("")
            );
            let _ = writeln!(out, "{}\n", textwrap::fill(finding.content.trim(), WRAP_WIDTH));
            let _ = writeln!(out, "_Confidence: {:.0}%_\n", finding.confidence * 100.0);
        }
    }

    if !brief.open_questions.is_empty() {
        out.push_str("## Open questions\n\n");
        for q in &brief.open_questions {
            let _ = writeln!(out, "- {}", q);
        }
        out.push('\n');
    }

    if !brief.sources.is_empty() {
        out.push_str("## Sources\n\n");
        for (i, source) in brief.sources.iter().enumerate() {
            let title = if source.title.trim().is_empty() {
                source.url.as_str()
            } else {
                source.title.trim()
            };
            let _ = writeln!(
                out,
                "{}. [{}]({}) ({}, {}, relevance {:.2})",
                i + 1,
                title,
                source.url,
                source.domain,
                source.source_type,
                source.relevance
            );
        }
        out.push('\n');
    }

    if !brief.sub_queries.is_empty() {
        out.push_str("## Research queries\n\n");
        for q in &brief.sub_queries {
            let _ = writeln!(out, "- {}", q);
        }
    }

    out.trim_end().to_string() + "\n"
}
