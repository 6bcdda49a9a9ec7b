//! HTML-to-text cleaning and title extraction.

use regex::Regex;
use std::sync::LazyLock;

/// Elements whose whole subtree is boilerplate.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "title", "nav", "header", "footer", "aside", "noscript", "form", "svg",
    "iframe",
];

/// Elements whose content is raw text (may contain `<`).
const RAW_TEXT_TAGS: &[&str] = &["script", "style"];

/// Tags that start a new line of text.
const BLOCK_TAGS: &[&str] = &[
    "p", "br", "div", "section", "article", "main", "h1", "h2", "h3", "h4", "h5", "h6", "li",
    "ul", "ol", "tr", "td", "th", "table", "blockquote", "pre", "dd", "dt", "figcaption", "hr",
];

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static OG_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta[^>]*property\s*=\s*["']og:title["'][^>]*content\s*=\s*["']([^"']*)["']"#)
        .unwrap()
});
static OG_TITLE_REVERSED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta[^>]*content\s*=\s*["']([^"']*)["'][^>]*property\s*=\s*["']og:title["']"#)
        .unwrap()
});

/// Strip markup and boilerplate from an HTML document.
///
/// Drops [`SKIP_TAGS`] subtrees, breaks lines at block elements, decodes
/// common entities and keeps only lines of at least `min_line_chars`.
pub fn clean_html(html: &str, min_line_chars: usize) -> String {
    let mut text = String::with_capacity(html.len() / 3);
    let mut in_tag = false;
    let mut building_tag = false;
    let mut tag_name = String::new();
    let mut tag_raw = String::new();
    let mut skip_depth: usize = 0;
    let mut raw_text: Option<&'static str> = None;

    for ch in html.chars() {
        if ch == '<' {
            in_tag = true;
            building_tag = true;
            tag_name.clear();
            tag_raw.clear();
            continue;
        }
        if in_tag {
            if ch == '>' {
                in_tag = false;
                building_tag = false;
                let name = tag_name.to_ascii_lowercase();
                let closing = name.starts_with('/');
                let bare = name.trim_start_matches('/');
                let self_closing = tag_raw.ends_with('/');

                if let Some(raw) = raw_text {
                    // Inside script/style only the matching close tag counts.
                    if closing && bare == raw {
                        raw_text = None;
                        skip_depth = skip_depth.saturating_sub(1);
                    }
                    continue;
                }

                if let Some(skip) = SKIP_TAGS.iter().find(|t| **t == bare) {
                    if closing {
                        skip_depth = skip_depth.saturating_sub(1);
                    } else if !self_closing {
                        skip_depth += 1;
                        if RAW_TEXT_TAGS.contains(skip) {
                            raw_text = Some(*skip);
                        }
                    }
                } else if skip_depth == 0 && BLOCK_TAGS.contains(&bare) {
                    text.push('\n');
                }
                continue;
            }
            if building_tag && (ch.is_ascii_alphanumeric() || (ch == '/' && tag_name.is_empty())) {
                tag_name.push(ch);
            } else {
                building_tag = false;
            }
            tag_raw.push(ch);
            continue;
        }
        if skip_depth > 0 || raw_text.is_some() {
            continue;
        }
        // Source line breaks inside a paragraph are just whitespace.
        if ch == '\n' || ch == '\r' || ch == '\t' {
            text.push(' ');
        } else {
            text.push(ch);
        }
    }

    filter_lines(&decode_entities(&text), min_line_chars)
}

/// Line filter for non-HTML text bodies.
pub fn clean_plain_text(body: &str, min_line_chars: usize) -> String {
    filter_lines(body, min_line_chars)
}

fn filter_lines(text: &str, min_line_chars: usize) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty() && line.chars().count() >= min_line_chars)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decode the handful of entities that matter for readable text.
pub fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&mdash;", "\u{2014}")
        .replace("&ndash;", "\u{2013}")
        .replace("&hellip;", "\u{2026}")
        .replace("&rsquo;", "\u{2019}")
        .replace("&lsquo;", "\u{2018}")
        .replace("&rdquo;", "\u{201d}")
        .replace("&ldquo;", "\u{201c}")
        .replace("&amp;", "&")
}

/// `<title>`, falling back to `og:title`.
pub fn extract_title(html: &str) -> Option<String> {
    capture_title(&TITLE_RE, html)
        .or_else(|| capture_title(&OG_TITLE_RE, html))
        .or_else(|| capture_title(&OG_TITLE_REVERSED_RE, html))
}

fn capture_title(re: &Regex, html: &str) -> Option<String> {
    re.captures(html)
        .map(|c| decode_entities(c[1].trim()))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

/// Title for a page with no usable markup title: the first content line of
/// at least 20 characters (cut to 120), else the domain.
pub fn backfill_title(content: &str, domain: &str) -> String {
    content
        .lines()
        .map(str::trim)
        .find(|line| line.chars().count() >= 20)
        .map(|line| truncate_chars(line, 120))
        .unwrap_or_else(|| domain.to_string())
}

/// Cut `s` to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
