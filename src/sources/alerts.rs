// src/sources/alerts.rs
//! Structured-alert API adapter (CAP-style JSON: a `features` array with
//! headline/description/instruction and sent/effective timestamps).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::fetch::FetchOptions;
use crate::sources::{FetchContext, SourceAdapter};
use crate::text;
use crate::types::{RawItem, Source, SourceKind};

#[derive(Debug, Deserialize)]
struct AlertsFeed {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    properties: Option<Properties>,
}

#[derive(Debug, Default, Deserialize)]
struct Properties {
    #[serde(default)]
    headline: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    instruction: Option<String>,
    #[serde(default, rename = "areaDesc")]
    area_desc: Option<String>,
    #[serde(default)]
    sent: Option<String>,
    #[serde(default)]
    effective: Option<String>,
    #[serde(default)]
    web: Option<String>,
}

/// Map the alert payload to raw items. Public for fixture-driven tests.
pub fn parse_alerts(body: &str, source: &Source) -> Result<Vec<RawItem>> {
    let feed: AlertsFeed = serde_json::from_str(body).context("parsing alerts json")?;
    let mut out = Vec::new();
    for feature in feed.features {
        let props = feature.properties.unwrap_or_default();
        let title = {
            let t = text::normalize_text(
                props
                    .headline
                    .as_deref()
                    .or(props.event.as_deref())
                    .unwrap_or("Alert"),
            );
            if t.is_empty() {
                "Alert".to_string()
            } else {
                t
            }
        };
        let description = text::normalize_text(props.description.as_deref().unwrap_or_default());
        let instruction = text::normalize_text(props.instruction.as_deref().unwrap_or_default());
        let summary = if !description.is_empty() {
            description.clone()
        } else {
            text::normalize_text(props.area_desc.as_deref().unwrap_or_default())
        };
        let content = [description, instruction]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let mut tags = source.tags.clone();
        if let Some(event) = props.event.as_deref() {
            let event_tag = text::normalize_text(event).to_lowercase();
            if !event_tag.is_empty() {
                tags.push(event_tag);
            }
        }

        out.push(RawItem {
            source_id: source.id.clone(),
            source_title: source.id.clone(),
            source_url: source.url.clone(),
            canonical_url: props
                .web
                .as_deref()
                .or(feature.id.as_deref())
                .and_then(text::normalize_url)
                .unwrap_or_default(),
            title,
            summary,
            content,
            published_at: props
                .sent
                .as_deref()
                .or(props.effective.as_deref())
                .and_then(text::parse_date_value),
            retrieved_at: Utc::now(),
            language: source.language.clone(),
            category: source.category.clone(),
            tags,
            allow_html: false,
        });
    }
    Ok(out)
}

pub struct StructuredAlertsAdapter;

#[async_trait]
impl SourceAdapter for StructuredAlertsAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::StructuredAlerts
    }

    async fn fetch_items(&self, source: &Source, ctx: &FetchContext<'_>) -> Result<Vec<RawItem>> {
        let opts = FetchOptions {
            timeout_ms: ctx.defaults.fetch_timeout_ms,
            retry: ctx.defaults.retry,
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            ..FetchOptions::default()
        };
        let fetched = ctx.fetcher.fetch_text(&source.url, &opts).await?;
        if fetched.not_modified {
            return Ok(Vec::new());
        }
        parse_alerts(&fetched.body, source)
    }
}
