// src/sources/hazard.rs
//! Geospatial-hazard API adapter. The endpoint returns a JSON array of
//! detections; the pull is summarized into a single item (the individual
//! detections are too granular to be documents). A missing API key is an
//! empty pull, not an error.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::fetch::FetchOptions;
use crate::sources::{FetchContext, SourceAdapter};
use crate::text;
use crate::types::{RawItem, Source, SourceKind};

pub const API_KEY_ENV: &str = "HAZARD_API_KEY";
const API_KEY_PLACEHOLDER: &str = "{api_key}";

pub struct HazardApiAdapter;

/// Count detections in the payload; accepts either a bare array or an
/// object wrapping one under `features` or `detections`.
pub fn detection_count(body: &str) -> Result<usize> {
    let value: Value = serde_json::from_str(body).context("parsing hazard json")?;
    let count = match &value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map
            .get("features")
            .or_else(|| map.get("detections"))
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0),
        _ => 0,
    };
    Ok(count)
}

pub fn summarize(source: &Source, url: &str, count: usize) -> RawItem {
    let title = format!("{} hazard detections ({count})", source.id);
    let summary = format!("Detected {count} hazard hotspots in the reporting window.");
    RawItem {
        source_id: source.id.clone(),
        source_title: source.id.clone(),
        source_url: url.to_string(),
        canonical_url: text::normalize_url(url).unwrap_or_default(),
        title,
        summary: summary.clone(),
        content: summary,
        published_at: Some(Utc::now()),
        retrieved_at: Utc::now(),
        language: source.language.clone(),
        category: source.category.clone(),
        tags: source.tags.clone(),
        allow_html: false,
    }
}

#[async_trait]
impl SourceAdapter for HazardApiAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::HazardApi
    }

    async fn fetch_items(&self, source: &Source, ctx: &FetchContext<'_>) -> Result<Vec<RawItem>> {
        let url = if source.url.contains(API_KEY_PLACEHOLDER) {
            let Ok(key) = std::env::var(API_KEY_ENV) else {
                tracing::info!(source = %source.id, "no {API_KEY_ENV}; skipping hazard pull");
                return Ok(Vec::new());
            };
            source.url.replace(API_KEY_PLACEHOLDER, &key)
        } else {
            source.url.clone()
        };

        let opts = FetchOptions {
            timeout_ms: ctx.defaults.fetch_timeout_ms,
            retry: ctx.defaults.retry,
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            ..FetchOptions::default()
        };
        let fetched = ctx.fetcher.fetch_text(&url, &opts).await?;
        if fetched.not_modified {
            return Ok(Vec::new());
        }
        let count = detection_count(&fetched.body)?;
        if count == 0 {
            return Ok(Vec::new());
        }
        // Report with the configured URL so the API key never lands in a
        // stored document.
        Ok(vec![summarize(source, &source.url, count)])
    }
}
