// src/freshness.rs
//! # Freshness curator
//! Exponential time-decay scoring per category half-life, with the
//! stale/expired lifecycle applied over the whole corpus on every pass.
//!
//! State machine per document: `fresh -> stale -> expired` is the only
//! forward path; `stale -> fresh` is the only backward transition;
//! `expired` is terminal barring explicit force re-ingestion.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::store::{DocumentFilter, DocumentPatch, DocumentStore};
use crate::text;
use crate::types::Document;

pub const STALE_REASON_FRESHNESS: &str = "freshness";
pub const STALE_REASON_EXPIRED: &str = "expired";

const DEFAULT_HALF_LIFE_HOURS: f64 = 72.0;
const EXPIRY_SUMMARY_SENTENCES: usize = 3;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FreshnessThresholds {
    pub stale: f64,
    pub expire: f64,
}

impl Default for FreshnessThresholds {
    fn default() -> Self {
        Self {
            stale: 0.22,
            expire: 0.08,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CurationOutcome {
    pub expired_count: usize,
    pub stale_count: usize,
}

/// Freshness at `now` for a document published at `published_at`:
/// `0.5 ^ (age_hours / half_life_hours)`, so a document one half-life old
/// scores exactly half of a brand-new one. Future timestamps clamp to age
/// zero, keeping the score in (0,1].
pub fn freshness_score_at(
    now: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    half_life_hours: f64,
) -> f64 {
    let half = if half_life_hours > 0.0 {
        half_life_hours
    } else {
        DEFAULT_HALF_LIFE_HOURS
    };
    let age_hours = published_at
        .map(|ts| (now - ts).num_seconds().max(0) as f64 / 3600.0)
        .unwrap_or(0.0);
    0.5f64.powf(age_hours / half)
}

pub fn freshness_score(published_at: Option<DateTime<Utc>>, half_life_hours: f64) -> f64 {
    freshness_score_at(Utc::now(), published_at, half_life_hours)
}

/// Ranking score used by the clusterer's representative pick and the
/// quota enforcer: freshness weighted by source reliability.
pub fn rank_score(freshness: f64, reliability: f64) -> f64 {
    let f = if freshness.is_finite() { freshness } else { 0.0 };
    let r = if reliability.is_finite() { reliability } else { 0.5 };
    f * (0.6 + 0.4 * r)
}

/// Evergreen/reference documents never expire. A document with no tags is
/// simply not evergreen (fail open toward curation, not data loss).
pub fn is_evergreen(doc: &Document) -> bool {
    doc.tags.iter().any(|t| t == "evergreen" || t == "reference")
}

/// First sentences of the body, kept for audit after expiry.
pub fn expiry_summary(body: &str) -> Vec<String> {
    text::split_sentences(&text::normalize_text(body))
        .into_iter()
        .take(EXPIRY_SUMMARY_SENTENCES)
        .collect()
}

/// One curation pass over the whole corpus. Decay applies globally, not
/// just to the current run's batch.
pub fn curate(
    store: &dyn DocumentStore,
    collection: &str,
    half_life_for: impl Fn(&str) -> f64,
    thresholds: FreshnessThresholds,
) -> Result<CurationOutcome> {
    let docs = store.list_documents(&DocumentFilter {
        collection: Some(collection.to_string()),
        include_stale: true,
        include_expired: true,
        ..DocumentFilter::default()
    })?;

    let now = Utc::now();
    let mut outcome = CurationOutcome::default();
    for doc in docs {
        if doc.expired {
            // Terminal; only force re-ingestion resets it.
            continue;
        }
        let half = half_life_for(&doc.category);
        let published = doc.published_at.or(Some(doc.retrieved_at));
        let freshness = freshness_score_at(now, published, half);
        let should_expire = freshness < thresholds.expire && !is_evergreen(&doc);
        let should_stale = freshness < thresholds.stale;

        if should_expire {
            let body = if !doc.cleaned_text.is_empty() {
                doc.cleaned_text.clone()
            } else {
                doc.summary.clone()
            };
            store.delete_document_chunks(&doc.doc_id)?;
            store.update_document(
                &doc.doc_id,
                &DocumentPatch {
                    expired: Some(true),
                    stale: Some(true),
                    stale_reason: Some(STALE_REASON_EXPIRED.to_string()),
                    freshness_score: Some(freshness),
                    cleaned_text: Some(String::new()),
                    summary_bullets: Some(expiry_summary(&body)),
                    chunk_count: Some(0),
                    ..DocumentPatch::default()
                },
            )?;
            outcome.expired_count += 1;
        } else if should_stale && !doc.stale {
            store.update_document(
                &doc.doc_id,
                &DocumentPatch {
                    stale: Some(true),
                    stale_reason: Some(STALE_REASON_FRESHNESS.to_string()),
                    freshness_score: Some(freshness),
                    ..DocumentPatch::default()
                },
            )?;
            outcome.stale_count += 1;
        } else if !should_stale && doc.stale {
            // Score recovered (e.g. republication bumped published_at).
            store.update_document(
                &doc.doc_id,
                &DocumentPatch {
                    stale: Some(false),
                    stale_reason: Some(String::new()),
                    freshness_score: Some(freshness),
                    ..DocumentPatch::default()
                },
            )?;
        } else {
            store.update_document(
                &doc.doc_id,
                &DocumentPatch {
                    freshness_score: Some(freshness),
                    ..DocumentPatch::default()
                },
            )?;
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn decay_is_monotonic() {
        let now = Utc::now();
        let s0 = freshness_score_at(now, Some(now), 48.0);
        let s1 = freshness_score_at(now, Some(now - Duration::hours(1)), 48.0);
        let s48 = freshness_score_at(now, Some(now - Duration::hours(48)), 48.0);
        assert!(s0 > s1);
        assert!(s1 > s48);
        assert!((s0 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn one_half_life_halves_the_score() {
        let now = Utc::now();
        let fresh = freshness_score_at(now, Some(now), 36.0);
        let aged = freshness_score_at(now, Some(now - Duration::hours(36)), 36.0);
        assert!((aged - 0.5 * fresh).abs() < 1e-9);
    }

    #[test]
    fn future_publish_dates_clamp_to_one() {
        let now = Utc::now();
        let s = freshness_score_at(now, Some(now + Duration::hours(5)), 24.0);
        assert!((s - 1.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_half_life_falls_back() {
        let now = Utc::now();
        let a = freshness_score_at(now, Some(now - Duration::hours(72)), 0.0);
        let b = freshness_score_at(now, Some(now - Duration::hours(72)), 72.0);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn rank_score_blends_reliability() {
        assert!(rank_score(1.0, 1.0) > rank_score(1.0, 0.0));
        assert!((rank_score(1.0, 1.0) - 1.0).abs() < 1e-9);
        assert!((rank_score(0.5, 0.5) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn expiry_summary_caps_at_three_sentences() {
        let bullets = expiry_summary("A. B. C. D. E.");
        assert_eq!(bullets, vec!["A.", "B.", "C."]);
    }
}
