// src/types.rs
//! Shared data model for the ingestion pipeline.
//!
//! `Source` is configuration (immutable during a run), `RawItem` is the
//! ephemeral adapter output, `Document` is the durable unit the store keeps.
//! Trends and run reports are rebuilt on every run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable document id: first 20 hex chars of the seed hash. The seed is
/// the canonical URL when there is one, else a composite of source,
/// title, publish time, and a content-hash prefix; either way the id is
/// stable across re-ingestion.
pub fn doc_id_for_seed(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    digest
        .iter()
        .take(10)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Closed set of adapter kinds. Source configs name these with a type
/// string; unknown strings are a configuration error, not a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Feed,
    HtmlPage,
    StructuredAlerts,
    HazardApi,
    /// Multi-page same-domain crawl seeded from the source URL.
    Site,
}

impl SourceKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feed" | "rss" => Some(Self::Feed),
            "html" | "html_page" => Some(Self::HtmlPage),
            "alerts" | "structured_alerts" => Some(Self::StructuredAlerts),
            "hazard" | "hazard_api" => Some(Self::HazardApi),
            "site" | "crawl" => Some(Self::Site),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::HtmlPage => "html_page",
            Self::StructuredAlerts => "structured_alerts",
            Self::HazardApi => "hazard_api",
            Self::Site => "site",
        }
    }
}

/// A configured origin. Built by `config::load`, never mutated mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub kind: SourceKind,
    pub url: String,
    pub category: String,
    pub tags: Vec<String>,
    /// Trust weight in [0,1]; 0 means "resolve from the reliability map".
    pub reliability: f64,
    pub enabled: bool,
    /// Whether the pipeline may fetch the full article page for feed items.
    pub allow_html: bool,
    /// Per-run admission cap for this source.
    pub max_items: usize,
    pub language: String,
}

/// Adapter output. Not persisted; everything durable derives from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub source_id: String,
    pub source_title: String,
    pub source_url: String,
    pub canonical_url: String,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub retrieved_at: DateTime<Utc>,
    pub language: String,
    pub category: String,
    pub tags: Vec<String>,
    pub allow_html: bool,
}

/// Typed entity buckets extracted by keyword/regex passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    pub tickers: Vec<String>,
    pub organizations: Vec<String>,
    pub commodities: Vec<String>,
    pub regions: Vec<String>,
    pub event_types: Vec<String>,
}

/// The durable unit. `doc_id` is stable across re-ingestion of the same
/// canonical URL (or composite seed), so upserts are idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub collection: String,
    pub source_id: String,
    pub source_title: String,
    pub source_url: String,
    pub canonical_url: String,
    pub title: String,
    pub summary: String,
    pub cleaned_text: String,
    /// SHA-256 hex of `cleaned_text`; exact-duplicate key.
    pub content_hash: String,
    /// 16 hex chars of the 64-bit simhash; empty when no token survived
    /// tokenization. Malformed values are treated as "no fingerprint".
    pub fingerprint: String,
    pub published_at: Option<DateTime<Utc>>,
    pub retrieved_at: DateTime<Utc>,
    pub language: String,
    pub category: String,
    pub tags: Vec<String>,
    pub signal_tags: Vec<String>,
    pub entities: Entities,
    /// In (0,1]; recomputed by the curator on every pass.
    pub freshness_score: f64,
    pub reliability_score: f64,
    pub stale: bool,
    pub stale_reason: String,
    /// Terminal barring force re-ingestion. Expired documents keep only
    /// `summary_bullets`; `cleaned_text` is cleared.
    pub expired: bool,
    pub summary_bullets: Vec<String>,
    pub cluster_id: Option<String>,
    pub cluster_label: String,
    /// `YYYY-MM-DD` of publish (or retrieval) date; quota grouping key.
    pub day_key: String,
    pub chunk_count: usize,
}

/// Lightweight projection used only for near-duplicate comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupCandidate {
    pub canonical_url: String,
    pub content_hash: String,
    pub fingerprint: String,
    pub collection: String,
    pub retrieved_at: DateTime<Utc>,
}

/// A named cluster produced by one clustering pass. Superseded, never
/// merged, by the next pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trend {
    pub cluster_id: String,
    pub label: String,
    pub representative_doc_id: String,
    pub representative_title: String,
    pub top_entities: Vec<String>,
    pub top_tickers: Vec<String>,
    pub signal_tags: Vec<String>,
    pub doc_count: usize,
    pub note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Ok,
    Partial,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceStats {
    pub source_id: String,
    pub pulled: usize,
    pub ingested: usize,
    pub skipped: usize,
    /// One entry per skipped item: seen_url, already_ingested, empty,
    /// dedup_exact, dedup_simhash, source_cap.
    pub skip_reasons: Vec<String>,
    pub errors: Vec<String>,
}

impl SourceStats {
    pub fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub source: String,
    pub error: String,
}

/// Operator-facing outcome of one ingestion run; serialized as the JSON
/// run report next to the append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub ingested: usize,
    pub skipped: usize,
    pub expired: usize,
    pub stale: usize,
    pub errors: Vec<RunError>,
    pub sources: Vec<SourceStats>,
    pub log_path: String,
}
