// src/crawl.rs
//! # Site crawler
//! Single-seed, same-domain page traversal used by web-knowledge
//! ingestion. Every fetch goes through the domain scheduler; robots rules
//! gate each URL and a robots crawl-delay tightens the origin's dispatch
//! delay (floored at 800 ms). The visited set is scoped to one crawl, so
//! each URL is dispatched at most once by construction.

use std::collections::{HashMap, HashSet, VecDeque};

use once_cell::sync::OnceCell;
use regex::Regex;
use url::Url;

use crate::dedup::content_hash;
use crate::fetch::{FetchOptions, PoliteFetcher};
use crate::robots::{self, RobotsGate};
use crate::scheduler::DomainScheduler;
use crate::text;

const ROBOTS_DELAY_FLOOR_MS: u64 = 800;
const QUEUE_FACTOR: usize = 3;

/// Prior crawl state for conditional GETs and change detection.
#[derive(Debug, Clone, Default)]
pub struct PageState {
    pub etag: String,
    pub last_modified: String,
    pub content_hash: String,
}

#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub url: String,
    pub title: String,
    pub text: String,
    pub content_hash: String,
    /// False when the prior state carried the same content hash.
    pub changed: bool,
    pub etag: String,
    pub last_modified: String,
    pub hint: &'static str,
}

#[derive(Debug, Default, Clone)]
pub struct CrawlMetrics {
    pub fetched: usize,
    pub skipped: usize,
    pub blocked: usize,
    pub errors: Vec<(String, String)>,
}

#[derive(Debug, Default, Clone)]
pub struct CrawlOutcome {
    pub pages: Vec<CrawledPage>,
    pub metrics: CrawlMetrics,
}

struct QueueItem {
    url: String,
    depth: usize,
    hint: &'static str,
}

pub struct SiteCrawler<'a> {
    pub fetcher: &'a PoliteFetcher,
    pub robots: &'a RobotsGate,
    pub scheduler: &'a DomainScheduler,
    pub max_pages: usize,
    pub timeout_ms: u64,
}

impl SiteCrawler<'_> {
    /// Crawl up to `max_pages` same-domain pages starting from `seed`.
    /// Per-URL failures are recorded and never abort the crawl.
    pub async fn crawl(
        &self,
        seed: &str,
        prior: &HashMap<String, PageState>,
    ) -> CrawlOutcome {
        let mut outcome = CrawlOutcome::default();
        let Some(start_url) = text::normalize_url(seed) else {
            outcome
                .metrics
                .errors
                .push((seed.to_string(), "invalid_seed".to_string()));
            return outcome;
        };
        let Some(domain) = text::host_of(&start_url) else {
            outcome
                .metrics
                .errors
                .push((seed.to_string(), "invalid_seed".to_string()));
            return outcome;
        };
        let origin = text::origin_of(&start_url).unwrap_or_default();

        let rules = self.robots.rules(&origin).await;
        if let Some(delay) = robots::crawl_delay(rules.as_deref(), self.robots.agent()) {
            let delay_ms = ((delay * 1000.0) as u64).max(ROBOTS_DELAY_FLOOR_MS);
            self.scheduler.set_origin_delay(&domain, delay_ms);
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<QueueItem> = VecDeque::new();
        queue.push_back(QueueItem {
            url: start_url,
            depth: 0,
            hint: "general",
        });

        while let Some(item) = queue.pop_front() {
            if outcome.pages.len() >= self.max_pages {
                break;
            }
            if !visited.insert(item.url.clone()) {
                continue;
            }
            if text::host_of(&item.url).as_deref() != Some(domain.as_str()) {
                continue;
            }
            if is_pdf_url(&item.url) {
                // Binary documents are an external parsing concern.
                outcome.metrics.skipped += 1;
                continue;
            }
            if !robots::is_allowed(rules.as_deref(), &item.url, self.robots.agent()) {
                outcome.metrics.blocked += 1;
                continue;
            }

            let state = prior.get(&item.url);
            let opts = FetchOptions {
                timeout_ms: self.timeout_ms,
                etag: state.map(|s| s.etag.clone()).filter(|s| !s.is_empty()),
                last_modified: state
                    .map(|s| s.last_modified.clone())
                    .filter(|s| !s.is_empty()),
                ..FetchOptions::default()
            };

            let fetched = self
                .scheduler
                .schedule(&item.url, self.fetcher.fetch_text(&item.url, &opts))
                .await;
            let response = match fetched {
                Ok(r) => r,
                Err(err) => {
                    outcome.metrics.errors.push((item.url.clone(), format!("{err:#}")));
                    continue;
                }
            };
            if response.not_modified {
                outcome.metrics.skipped += 1;
                continue;
            }

            let html = response.body;
            let title = text::extract_html_title(&html);
            let body = text::clean_text(&html);
            let hash = content_hash(&body);
            let changed = state.map(|s| s.content_hash != hash).unwrap_or(true);

            for link in extract_links(&html, &item.url) {
                if visited.contains(&link) || queue.len() >= self.max_pages * QUEUE_FACTOR {
                    continue;
                }
                let hint = classify_link(&link);
                queue.push_back(QueueItem {
                    url: link,
                    depth: item.depth + 1,
                    hint,
                });
            }

            outcome.metrics.fetched += 1;
            outcome.pages.push(CrawledPage {
                url: item.url,
                title,
                text: body,
                content_hash: hash,
                changed,
                etag: response.etag,
                last_modified: response.last_modified,
                hint: item.hint,
            });
        }
        outcome
    }
}

fn is_pdf_url(url: &str) -> bool {
    url.to_lowercase().contains(".pdf")
}

/// Anchor hrefs resolved against the page URL, normalized, deduplicated.
pub fn extract_links(html: &str, base: &str) -> Vec<String> {
    static RE_HREF: OnceCell<Regex> = OnceCell::new();
    let re = RE_HREF.get_or_init(|| {
        Regex::new(r#"(?i)<a\s+[^>]*href\s*=\s*["']([^"'#]+)["']"#).expect("href regex")
    });
    let Ok(base_url) = Url::parse(base) else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for cap in re.captures_iter(html) {
        let href = cap[1].trim();
        if href.starts_with("mailto:") || href.starts_with("javascript:") {
            continue;
        }
        let Ok(resolved) = base_url.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        let Some(normalized) = text::normalize_url(resolved.as_str()) else {
            continue;
        };
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    out
}

/// Coarse section hint from the URL path; steers downstream chunk tagging.
pub fn classify_link(url: &str) -> &'static str {
    static RE_NEWS: OnceCell<Regex> = OnceCell::new();
    static RE_ABOUT: OnceCell<Regex> = OnceCell::new();
    static RE_CONTACT: OnceCell<Regex> = OnceCell::new();
    static RE_REFERENCE: OnceCell<Regex> = OnceCell::new();

    let lower = url.to_lowercase();
    let re = |cell: &'static OnceCell<Regex>, pattern: &str| {
        cell.get_or_init(|| Regex::new(pattern).expect("link regex"))
    };
    if re(&RE_NEWS, r"(news|press|blog|events|updates)").is_match(&lower) {
        return "news";
    }
    if re(&RE_ABOUT, r"(about|story|team|mission)").is_match(&lower) {
        return "about";
    }
    if re(&RE_CONTACT, r"(contact|location|visit|directions)").is_match(&lower) {
        return "contact";
    }
    if re(&RE_REFERENCE, r"(docs|guide|help|faq|reference)").is_match(&lower) {
        return "reference";
    }
    "general"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_resolve_and_filter() {
        let html = r#"
            <a href="/about/team">Team</a>
            <a href="https://example.com/news/1">News</a>
            <a href="https://other.example/x">Other host is kept here</a>
            <a href="mailto:hi@example.com">Mail</a>
            <a href="/about/team">Dup</a>
        "#;
        let links = extract_links(html, "https://example.com/");
        assert_eq!(
            links,
            vec![
                "https://example.com/about/team".to_string(),
                "https://example.com/news/1".to_string(),
                "https://other.example/x".to_string(),
            ]
        );
    }

    #[test]
    fn link_hints() {
        assert_eq!(classify_link("https://x.example/press/release"), "news");
        assert_eq!(classify_link("https://x.example/about"), "about");
        assert_eq!(classify_link("https://x.example/docs/api"), "reference");
        assert_eq!(classify_link("https://x.example/pricing"), "general");
    }

    #[test]
    fn pdf_urls_detected() {
        assert!(is_pdf_url("https://x.example/menu.PDF"));
        assert!(!is_pdf_url("https://x.example/menu"));
    }
}
