//! Source extraction from model prose and from a reply's `sources` array.
//!
//! Three shapes are recognized in prose, in this order:
//!
//! - `[Source: title https://url]` tags (a tag without a URL is a derived source)
//! - standalone http(s) URLs, titled from the surrounding sentence
//! - `(Author, 2020)` and `(Author et al., 2020)` citations

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::types::{Source, SourceType};
use crate::stage::Reply;

static SOURCE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[Source:\s*([^\]]+)\]").unwrap());

static TAG_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[-\w.]+(?::[0-9]+)?(?:/[\w/_.~:?#\[\]@!$&'()*+,;=%-]*)?").unwrap()
});

static STANDALONE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[-\w.]+(?::[0-9]+)?(?:/[\w/_.~:?#@!$&'()*+,;=%-]*)?").unwrap()
});

static CITATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(([A-Z][a-z]+(?:\s+et\s+al\.?)?,\s*\d{4})\)").unwrap()
});

static SENTENCE_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]\s+").unwrap());

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const CONTEXT_BEFORE: usize = 100;
const CONTEXT_AFTER: usize = 50;
const MAX_TITLE_CHARS: usize = 100;
const MAX_SNIPPET_CHARS: usize = 100;

/// Keep only absolute http(s) URLs with a host.
pub fn validate_url(raw: &str) -> Option<String> {
    match reqwest::Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {
            Some(raw.to_string())
        }
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(url = raw, error = %e, "Discarding invalid URL");
            None
        }
    }
}

/// Drop sentence punctuation the URL pattern swallows, and a closing
/// parenthesis with no opening one inside the URL.
fn trim_url(raw: &str) -> &str {
    let mut url = raw;
    loop {
        let trimmed = url.trim_end_matches(['.', ',', ';', ':', '!', '?', '\'']);
        let trimmed = match trimmed.strip_suffix(')') {
            Some(rest) if !rest.contains('(') => rest,
            _ => trimmed,
        };
        if trimmed.len() == url.len() {
            return url;
        }
        url = trimmed;
    }
}

fn title_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn truncate_chars(text: &str, max: usize) -> &str {
    text.char_indices()
        .nth(max)
        .map_or(text, |(i, _)| &text[..i])
}

/// The sentence around a URL, or the URL itself when nothing usable remains.
fn title_from_context(context: &str, url: &str) -> String {
    let cleaned = context.replace(url, "");
    let sentences: Vec<&str> = SENTENCE_BREAK.split(cleaned.trim()).collect();

    let candidate = match sentences.as_slice() {
        [.., last] if !last.trim().is_empty() => *last,
        [first, _, ..] => *first,
        _ => url,
    };
    let title = WHITESPACE.replace_all(candidate, " ").trim().to_string();

    if title.is_empty() {
        url.to_string()
    } else if title.chars().count() > MAX_TITLE_CHARS {
        format!("{}...", truncate_chars(&title, MAX_TITLE_CHARS - 3))
    } else {
        title
    }
}

/// Every source cited in free text.
pub fn extract_sources(text: &str) -> Vec<Source> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut sources = Vec::new();
    let mut seen_urls: HashSet<String> = HashSet::new();

    for cap in SOURCE_TAG.captures_iter(text) {
        let body = cap[1].trim();
        if body.is_empty() {
            continue;
        }
        let url_match = TAG_URL.find(body);
        let url = url_match.and_then(|m| validate_url(trim_url(m.as_str())));

        match (url, url_match) {
            (Some(url), Some(m)) => {
                if !seen_urls.insert(url.clone()) {
                    continue;
                }
                let title = body[..m.start()].trim();
                let title = if title.is_empty() {
                    title_from_url(&url)
                } else {
                    title.to_string()
                };
                sources.push(Source::new(title, Some(url), SourceType::Web));
            }
            _ => sources.push(Source::new(body, None, SourceType::Derived)),
        }
    }

    for m in STANDALONE_URL.find_iter(text) {
        let Some(url) = validate_url(trim_url(m.as_str())) else {
            continue;
        };
        if !seen_urls.insert(url.clone()) {
            continue;
        }
        let start = floor_char_boundary(text, m.start().saturating_sub(CONTEXT_BEFORE));
        let end = ceil_char_boundary(text, (m.end() + CONTEXT_AFTER).min(text.len()));
        let context = &text[start..end];

        sources.push(
            Source::new(title_from_context(context, &url), Some(url), SourceType::Web)
                .with_snippet(truncate_chars(context, MAX_SNIPPET_CHARS)),
        );
    }

    for cap in CITATION.captures_iter(text) {
        sources.push(Source::new(&cap[1], None, SourceType::Research));
    }

    tracing::debug!(count = sources.len(), "Sources extracted from text");
    sources
}

/// Sources listed in a reply's `sources` array.
///
/// Entries may be objects with `title` and optional `url`, or bare strings.
/// Entries without a usable title are dropped.
pub fn sources_from_reply(stage: &str, reply: &Reply) -> Vec<Source> {
    reply
        .get("sources")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(title) if !title.trim().is_empty() => {
                        Some(Source::new(title.trim(), None, SourceType::Derived))
                    }
                    Value::Object(fields) => {
                        let title = fields.get("title").and_then(Value::as_str)?.trim();
                        if title.is_empty() {
                            return None;
                        }
                        let url = fields
                            .get("url")
                            .and_then(Value::as_str)
                            .and_then(validate_url);
                        let kind = if url.is_some() {
                            SourceType::Web
                        } else {
                            SourceType::Derived
                        };
                        Some(Source::new(title, url, kind))
                    }
                    other => {
                        tracing::warn!(stage, entry = %other, "Unusable source entry, skipping");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_tag_with_url() {
        let text = "Ownership is central [Source: The Rust Book https://doc.rust-lang.org/book/].";
        let sources = extract_sources(text);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].title, "The Rust Book");
        assert_eq!(sources[0].url.as_deref(), Some("https://doc.rust-lang.org/book/"));
        assert_eq!(sources[0].source_type, SourceType::Web);
    }

    #[test]
    fn source_tag_without_url_is_derived() {
        let sources = extract_sources("Per the 2023 survey [Source: Stack Overflow survey].");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].title, "Stack Overflow survey");
        assert!(sources[0].url.is_none());
        assert_eq!(sources[0].source_type, SourceType::Derived);
    }

    #[test]
    fn tag_with_only_url_is_titled_by_host() {
        let sources = extract_sources("[Source: https://www.rust-lang.org/learn]");
        assert_eq!(sources[0].title, "www.rust-lang.org");
    }

    #[test]
    fn standalone_urls_are_deduplicated_and_trimmed() {
        let text = "See the docs at https://docs.rs/tokio. Also https://docs.rs/tokio, again.";
        let sources = extract_sources(text);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].url.as_deref(), Some("https://docs.rs/tokio"));
        assert!(sources[0].content_snippet.is_some());
        assert!(!sources[0].title.is_empty());
    }

    #[test]
    fn tagged_url_is_not_repeated_as_standalone() {
        let text = "[Source: Tokio docs https://tokio.rs/] and later https://tokio.rs/ again";
        let sources = extract_sources(text);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].title, "Tokio docs");
    }

    #[test]
    fn url_inside_parentheses_drops_closing_paren() {
        let sources = extract_sources("Rust (https://www.rust-lang.org) is fast.");
        assert_eq!(sources[0].url.as_deref(), Some("https://www.rust-lang.org"));
    }

    #[test]
    fn academic_citations() {
        let text = "Borrow checking was formalized (Jung et al., 2018) and extended (Weiss, 2019).";
        let titles: Vec<String> = extract_sources(text).into_iter().map(|s| s.title).collect();
        assert_eq!(titles, vec!["Jung et al., 2018", "Weiss, 2019"]);
    }

    #[test]
    fn invalid_urls_are_discarded() {
        assert!(validate_url("ftp://example.com").is_none());
        assert!(validate_url("not a url").is_none());
        assert!(validate_url("https://example.com/path").is_some());
    }

    #[test]
    fn long_context_titles_are_truncated() {
        let filler = "word ".repeat(40);
        let text = format!("{filler}https://example.com/page {filler}");
        let sources = extract_sources(&text);
        assert!(sources[0].title.chars().count() <= MAX_TITLE_CHARS);
        assert!(sources[0].title.ends_with("..."));
    }

    #[test]
    fn empty_text_has_no_sources() {
        assert!(extract_sources("   ").is_empty());
    }

    #[test]
    fn reply_sources_accept_objects_and_strings() {
        let reply = Reply::parse(
            "researcher",
            r#"{"content": "x", "sources": [
                {"title": "Rustonomicon", "url": "https://doc.rust-lang.org/nomicon/"},
                {"title": "Internal notes", "url": "nope"},
                "Blog post",
                {"url": "https://untitled.example"},
                42
            ]}"#,
        )
        .unwrap();
        let sources = sources_from_reply("researcher", &reply);
        let summary: Vec<(&str, SourceType)> = sources
            .iter()
            .map(|s| (s.title.as_str(), s.source_type))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Rustonomicon", SourceType::Web),
                ("Internal notes", SourceType::Derived),
                ("Blog post", SourceType::Derived),
            ]
        );
    }
}
