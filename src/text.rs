// src/text.rs
//! Text normalization and extraction helpers shared across the pipeline:
//! HTML stripping, whitespace normalization, URL canonicalization,
//! tokenization, keyword counting, and sentence splitting.

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use url::Url;

/// Tokens dropped by `tokenize`. Mix of function words and feed-title
/// filler that would otherwise dominate keyword counts.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "that", "this", "will", "into", "over", "than", "after",
    "before", "about", "market", "markets", "news", "report", "reports", "update", "weekly",
    "daily", "today", "latest", "says",
];

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex must compile"))
}

/// Collapse whitespace and trim. Input is assumed to be plain text.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip tags and decode entities, keeping newlines between block elements
/// so `clean_text` can still filter boilerplate line by line.
pub fn strip_html(raw: &str) -> String {
    static RE_DROP: OnceCell<Regex> = OnceCell::new();
    static RE_BLOCK: OnceCell<Regex> = OnceCell::new();
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();

    let mut text = re(
        &RE_DROP,
        r"(?is)<(script|style|noscript|svg)\b[^>]*>.*?</(script|style|noscript|svg)>",
    )
    .replace_all(raw, " ")
    .to_string();
    text = re(
        &RE_BLOCK,
        r"(?i)</?(p|div|br|li|ul|ol|h[1-6]|tr|table|section|article|header|footer)\b[^>]*>",
    )
    .replace_all(&text, "\n")
    .to_string();
    text = re(&RE_TAGS, r"(?is)</?[^>]+>")
        .replace_all(&text, " ")
        .to_string();
    html_escape::decode_html_entities(&text).to_string()
}

/// Strip HTML and drop boilerplate lines (cookie banners, signup prompts,
/// footer legalese, very short fragments).
pub fn clean_text(raw: &str) -> String {
    let text = strip_html(raw);
    if text.trim().is_empty() {
        return String::new();
    }
    let lines: Vec<String> = text
        .split('\n')
        .map(normalize_text)
        .filter(|line| !line.is_empty())
        .collect();
    let filtered: Vec<&String> = lines
        .iter()
        .filter(|line| {
            let lower = line.to_lowercase();
            if line.len() < 30 {
                return false;
            }
            if lower.contains("cookie") || lower.contains("privacy") || lower.contains("subscribe")
            {
                return false;
            }
            if lower.contains("all rights reserved") || lower.contains("terms of use") {
                return false;
            }
            if lower.contains("sign up") || lower.contains("log in") {
                return false;
            }
            true
        })
        .collect();
    if filtered.is_empty() {
        normalize_text(&text)
    } else {
        normalize_text(
            &filtered
                .into_iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" "),
        )
    }
}

/// Truncate to `max_chars` characters (not bytes), appending an ellipsis.
pub fn limit_text(text: &str, max_chars: usize) -> String {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

pub fn extract_html_title(html: &str) -> String {
    static RE_TITLE: OnceCell<Regex> = OnceCell::new();
    re(&RE_TITLE, r"(?i)<title[^>]*>([^<]+)</title>")
        .captures(html)
        .map(|c| normalize_text(&c[1]))
        .unwrap_or_default()
}

pub fn extract_meta_description(html: &str) -> String {
    static RE_META: OnceCell<Regex> = OnceCell::new();
    re(
        &RE_META,
        r#"(?i)<meta[^>]+name=["']description["'][^>]+content=["']([^"']+)["'][^>]*>"#,
    )
    .captures(html)
    .map(|c| normalize_text(&c[1]))
    .unwrap_or_default()
}

/// Published-time discovery: OpenGraph meta, `<time datetime=..>`, then a
/// loose "Release Date: Month D, YYYY" fallback.
pub fn extract_published_time(html: &str) -> String {
    static RE_META: OnceCell<Regex> = OnceCell::new();
    static RE_TIME: OnceCell<Regex> = OnceCell::new();
    static RE_RELEASE: OnceCell<Regex> = OnceCell::new();

    if let Some(c) = re(
        &RE_META,
        r#"(?i)<meta[^>]+property=["']article:published_time["'][^>]+content=["']([^"']+)["'][^>]*>"#,
    )
    .captures(html)
    {
        return c[1].to_string();
    }
    if let Some(c) = re(&RE_TIME, r#"(?i)<time[^>]+datetime=["']([^"']+)["'][^>]*>"#).captures(html)
    {
        return c[1].to_string();
    }
    if let Some(c) = re(
        &RE_RELEASE,
        r"(?i)(?:Release Date|Released|Publication Date)\s*[:\-]?\s*([A-Za-z]+\s+\d{1,2},\s+\d{4})",
    )
    .captures(html)
    {
        return c[1].to_string();
    }
    String::new()
}

/// Liberal date parsing: RFC 3339, RFC 2822, `YYYY-MM-DD`, `Month D, YYYY`.
pub fn parse_date_value(value: &str) -> Option<DateTime<Utc>> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(v) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDate::parse_from_str(v, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(v, "%B %d, %Y") {
        return d.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }
    None
}

/// Canonicalize a URL: parse, drop the fragment. Unparseable input yields
/// `None` so callers fall back to other identity sources.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    url.set_fragment(None);
    Some(url.to_string())
}

/// Hostname used as the politeness key by the scheduler.
pub fn host_of(raw: &str) -> Option<String> {
    Url::parse(raw).ok()?.host_str().map(|h| h.to_string())
}

/// `scheme://host[:port]` used as the robots.txt cache key.
pub fn origin_of(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let origin = url.origin();
    if origin.is_tuple() {
        Some(origin.ascii_serialization())
    } else {
        None
    }
}

/// Lowercase, keep ASCII alphanumerics, drop tokens outside 3..=24 chars
/// and stopwords. The shared token stream for simhash and keywords.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered: String = text
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    lowered
        .split_whitespace()
        .filter(|t| t.len() >= 3 && t.len() <= 24 && !STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}

/// Top `limit` tokens by count; ties broken alphabetically so cluster
/// labels are deterministic.
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    use std::collections::HashMap;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0) += 1;
    }
    let mut pairs: Vec<(String, usize)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    pairs.into_iter().take(limit).map(|(t, _)| t).collect()
}

/// Naive sentence split on `.!?` boundaries.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let s = normalize_text(&current);
            if !s.is_empty() {
                out.push(s);
            }
            current.clear();
        }
    }
    let tail = normalize_text(&current);
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// `YYYY-MM-DD` grouping key for quota enforcement.
pub fn day_key(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize_text("  a \n\t b  "), "a b");
    }

    #[test]
    fn strip_html_removes_script_and_tags() {
        let html = "<html><script>var x=1;</script><p>Hello &amp; goodbye</p></html>";
        let out = normalize_text(&strip_html(html));
        assert_eq!(out, "Hello & goodbye");
    }

    #[test]
    fn clean_text_drops_boilerplate_lines() {
        let html = "<p>Accept our cookie policy to continue browsing this site</p>\
                    <p>Crude oil inventories fell sharply last week according to the report</p>";
        let out = clean_text(html);
        assert!(out.contains("Crude oil inventories"));
        assert!(!out.to_lowercase().contains("cookie"));
    }

    #[test]
    fn limit_text_is_char_safe() {
        assert_eq!(limit_text("abcdef", 3), "abc...");
        assert_eq!(limit_text("abc", 10), "abc");
    }

    #[test]
    fn normalize_url_strips_fragment() {
        assert_eq!(
            normalize_url("https://example.com/a?b=1#frag").as_deref(),
            Some("https://example.com/a?b=1")
        );
        assert!(normalize_url("not a url").is_none());
    }

    #[test]
    fn tokenize_filters_short_and_stopwords() {
        let toks = tokenize("The port IS closed; shipping halted!");
        assert_eq!(toks, vec!["port", "closed", "shipping", "halted"]);
    }

    #[test]
    fn keywords_are_deterministic() {
        let text = "port port shipping shipping canal";
        assert_eq!(extract_keywords(text, 2), vec!["port", "shipping"]);
    }

    #[test]
    fn sentences_split_and_cap() {
        let s = split_sentences("One. Two! Three? Four");
        assert_eq!(s, vec!["One.", "Two!", "Three?", "Four"]);
    }

    #[test]
    fn day_key_formats() {
        let ts = parse_date_value("2026-03-05T10:00:00Z").unwrap();
        assert_eq!(day_key(ts), "2026-03-05");
    }
}
