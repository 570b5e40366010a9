// src/sources/feed.rs
//! RSS feed adapter. Parsing is serde-over-quick-xml on the usual
//! `rss/channel/item` shape; publish dates are RFC 2822.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::fetch::FetchOptions;
use crate::sources::{FetchContext, SourceAdapter};
use crate::text;
use crate::types::{RawItem, Source, SourceKind};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

fn parse_rfc2822_utc(ts: &str) -> Option<DateTime<Utc>> {
    let dt = OffsetDateTime::parse(ts, &Rfc2822).ok()?;
    DateTime::from_timestamp(dt.to_offset(UtcOffset::UTC).unix_timestamp(), 0)
}

/// Feeds routinely carry HTML entities that are not valid XML; scrub the
/// common ones before handing the body to the XML parser.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

/// Parse a feed body into raw items. Public so fixture-driven tests can
/// exercise parsing without HTTP.
pub fn parse_feed(xml: &str, source: &Source, max_items: usize) -> Result<Vec<RawItem>> {
    let t0 = std::time::Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);
    let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;

    let feed_title = rss
        .channel
        .title
        .as_deref()
        .map(text::normalize_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| source.id.clone());

    let mut out = Vec::new();
    for item in rss.channel.item.into_iter().take(max_items.max(1)) {
        let link = item
            .link
            .as_deref()
            .or(item.guid.as_deref())
            .unwrap_or_default();
        let canonical_url = text::normalize_url(link).unwrap_or_default();
        let title = item
            .title
            .as_deref()
            .map(text::normalize_text)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| feed_title.clone());
        let summary = item
            .description
            .as_deref()
            .map(text::clean_text)
            .unwrap_or_default();

        out.push(RawItem {
            source_id: source.id.clone(),
            source_title: feed_title.clone(),
            source_url: source.url.clone(),
            canonical_url,
            title,
            summary: summary.clone(),
            content: summary,
            published_at: item.pub_date.as_deref().and_then(parse_rfc2822_utc),
            retrieved_at: Utc::now(),
            language: source.language.clone(),
            category: source.category.clone(),
            tags: source.tags.clone(),
            allow_html: source.allow_html,
        });
    }

    histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    counter!("ingest_items_total").increment(out.len() as u64);
    Ok(out)
}

pub struct FeedAdapter;

#[async_trait]
impl SourceAdapter for FeedAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Feed
    }

    async fn fetch_items(&self, source: &Source, ctx: &FetchContext<'_>) -> Result<Vec<RawItem>> {
        let opts = FetchOptions {
            timeout_ms: ctx.defaults.fetch_timeout_ms,
            retry: ctx.defaults.retry,
            ..FetchOptions::default()
        };
        let fetched = ctx.fetcher.fetch_text(&source.url, &opts).await?;
        if fetched.not_modified {
            return Ok(Vec::new());
        }
        parse_feed(
            &fetched.body,
            source,
            source.max_items.min(ctx.defaults.max_items_per_feed).max(1),
        )
    }
}
