// src/sources/site.rs
//! Site-crawl adapter: seeds the same-domain crawler from the source URL
//! and turns each changed page into a raw item. This is the one adapter
//! path that runs concurrently, through the domain scheduler.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::crawl::SiteCrawler;
use crate::sources::{FetchContext, SourceAdapter};
use crate::types::{RawItem, Source, SourceKind};

pub struct SiteCrawlAdapter;

#[async_trait]
impl SourceAdapter for SiteCrawlAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Site
    }

    async fn fetch_items(&self, source: &Source, ctx: &FetchContext<'_>) -> Result<Vec<RawItem>> {
        let crawler = SiteCrawler {
            fetcher: ctx.fetcher,
            robots: ctx.robots,
            scheduler: ctx.scheduler,
            max_pages: source.max_items.max(1),
            timeout_ms: ctx.defaults.fetch_timeout_ms,
        };
        // Page state (etags, content hashes) lives with the document
        // store in a full deployment; a run without it just refetches.
        let outcome = crawler.crawl(&source.url, &HashMap::new()).await;
        for (url, error) in &outcome.metrics.errors {
            tracing::warn!(source = %source.id, url = %url, error = %error, "crawl page failed");
        }

        let retrieved_at = Utc::now();
        let items = outcome
            .pages
            .into_iter()
            .filter(|page| !page.text.is_empty())
            .map(|page| RawItem {
                source_id: source.id.clone(),
                source_title: source.id.clone(),
                source_url: source.url.clone(),
                canonical_url: page.url.clone(),
                title: if page.title.is_empty() {
                    page.url
                } else {
                    page.title
                },
                summary: String::new(),
                content: page.text,
                published_at: None,
                retrieved_at,
                language: source.language.clone(),
                category: source.category.clone(),
                tags: {
                    let mut tags = source.tags.clone();
                    if page.hint != "general" {
                        tags.push(page.hint.to_string());
                    }
                    tags
                },
                // Pages were just fetched; never refetch per item.
                allow_html: false,
            })
            .collect();
        Ok(items)
    }
}
