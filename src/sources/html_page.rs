// src/sources/html_page.rs
//! Single-page HTML adapter: one configured URL becomes one raw item.
//! Robots-gated; a disallowed page yields an empty pull, not an error.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::fetch::FetchOptions;
use crate::sources::{FetchContext, SourceAdapter};
use crate::text;
use crate::types::{RawItem, Source, SourceKind};

pub struct HtmlPageAdapter;

#[async_trait]
impl SourceAdapter for HtmlPageAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::HtmlPage
    }

    async fn fetch_items(&self, source: &Source, ctx: &FetchContext<'_>) -> Result<Vec<RawItem>> {
        if !ctx.robots.allows(&source.url).await {
            tracing::info!(source = %source.id, url = %source.url, "robots disallow; skipping page");
            return Ok(Vec::new());
        }
        let opts = FetchOptions {
            timeout_ms: ctx.defaults.fetch_timeout_ms,
            retry: ctx.defaults.retry,
            ..FetchOptions::default()
        };
        let fetched = ctx.fetcher.fetch_text(&source.url, &opts).await?;
        if fetched.not_modified {
            return Ok(Vec::new());
        }
        let html = fetched.body;

        let title = {
            let t = text::extract_html_title(&html);
            if t.is_empty() {
                source.id.clone()
            } else {
                t
            }
        };
        let summary = text::extract_meta_description(&html);
        let published_at = text::parse_date_value(&text::extract_published_time(&html));

        Ok(vec![RawItem {
            source_id: source.id.clone(),
            source_title: source.id.clone(),
            source_url: source.url.clone(),
            canonical_url: text::normalize_url(&source.url).unwrap_or_default(),
            title,
            summary,
            content: text::clean_text(&html),
            published_at,
            retrieved_at: Utc::now(),
            language: source.language.clone(),
            category: source.category.clone(),
            tags: source.tags.clone(),
            // The page itself was just fetched; no second fetch needed.
            allow_html: false,
        }])
    }
}
