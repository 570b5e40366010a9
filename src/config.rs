// src/config.rs
//! JSON configuration surface: per-category half-lives, thresholds, caps,
//! dedup and scheduler settings, reliability map, and the source list.
//! Validation fails fast at the load boundary; a bad config never starts
//! a run.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::dedup::DedupConfig;
use crate::fetch::RetryPolicy;
use crate::freshness::FreshnessThresholds;
use crate::types::{Source, SourceKind};

pub const DEFAULT_RELIABILITY: f64 = 0.7;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    pub max_per_origin: usize,
    pub min_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 6,
            max_per_origin: 2,
            min_delay_ms: 800,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub language: String,
    pub collection: String,
    pub user_agent: String,
    pub max_items_per_feed: usize,
    pub max_doc_chars: usize,
    pub fetch_timeout_ms: u64,
    pub request_delay_ms: u64,
    pub retry: RetryPolicy,
    pub max_docs_per_source_per_day: usize,
    pub max_docs_per_cluster_per_day: usize,
    pub cluster_count: usize,
    pub cluster_iterations: usize,
    pub min_cluster_docs: usize,
    pub freshness: FreshnessThresholds,
    pub half_life_hours: HashMap<String, f64>,
    pub dedup: DedupConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            collection: "signals".to_string(),
            user_agent: "SignalHarvester/1.0".to_string(),
            max_items_per_feed: 40,
            max_doc_chars: 50_000,
            fetch_timeout_ms: 15_000,
            request_delay_ms: 350,
            retry: RetryPolicy {
                retries: 2,
                min_delay_ms: 600,
                max_delay_ms: 4000,
            },
            max_docs_per_source_per_day: 30,
            max_docs_per_cluster_per_day: 12,
            cluster_count: 8,
            cluster_iterations: 6,
            min_cluster_docs: 3,
            freshness: FreshnessThresholds::default(),
            half_life_hours: seed_half_lives(),
            dedup: DedupConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Defaults {
    /// Category half-life with the global fallback.
    pub fn half_life_for(&self, category: &str) -> f64 {
        self.half_life_hours.get(category).copied().unwrap_or(72.0)
    }
}

fn seed_half_lives() -> HashMap<String, f64> {
    let mut map = HashMap::new();
    for (category, hours) in [
        ("breaking_market", 36.0),
        ("macro_regulatory", 168.0),
        ("environmental_outlook", 720.0),
        ("energy_inventory", 240.0),
        ("environmental_hazard", 72.0),
        ("shipping_disruption", 96.0),
    ] {
        map.insert(category.to_string(), hours);
    }
    map
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawSource {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    reliability: f64,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    allow_html: bool,
    #[serde(default)]
    max_items: Option<usize>,
    #[serde(default)]
    language: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    defaults: Option<Defaults>,
    #[serde(default)]
    reliability: HashMap<String, f64>,
    #[serde(default)]
    sources: Vec<RawSource>,
}

#[derive(Debug, Clone)]
pub struct SignalsConfig {
    pub defaults: Defaults,
    pub reliability: HashMap<String, f64>,
    pub sources: Vec<Source>,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            defaults: Defaults::default(),
            reliability: HashMap::new(),
            sources: Vec::new(),
        }
    }
}

impl SignalsConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config {}", path.as_ref().display()))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: RawConfig = serde_json::from_str(raw).context("parsing signals config")?;
        let defaults = parsed.defaults.unwrap_or_default();
        let mut sources = Vec::with_capacity(parsed.sources.len());
        for raw_source in parsed.sources {
            sources.push(normalize_source(raw_source, &defaults)?);
        }
        let config = Self {
            defaults,
            reliability: parsed.reliability,
            sources,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if !seen.insert(&source.id) {
                bail!("duplicate source id '{}'", source.id);
            }
            if !(0.0..=1.0).contains(&source.reliability) {
                bail!(
                    "source '{}': reliability {} outside [0,1]",
                    source.id,
                    source.reliability
                );
            }
        }
        if self.defaults.freshness.expire >= self.defaults.freshness.stale {
            bail!(
                "freshness thresholds inverted: expire {} >= stale {}",
                self.defaults.freshness.expire,
                self.defaults.freshness.stale
            );
        }
        for (id, weight) in &self.reliability {
            if !(0.0..=1.0).contains(weight) {
                bail!("reliability map entry '{id}': {weight} outside [0,1]");
            }
        }
        Ok(())
    }

    /// Source override, then the reliability map, then the default.
    pub fn resolve_reliability(&self, source: &Source) -> f64 {
        if source.reliability > 0.0 {
            return source.reliability;
        }
        self.reliability
            .get(&source.id.to_lowercase())
            .copied()
            .unwrap_or(DEFAULT_RELIABILITY)
    }
}

fn normalize_source(raw: RawSource, defaults: &Defaults) -> Result<Source> {
    let id = raw.id.trim().to_string();
    if id.is_empty() {
        bail!("source with empty id");
    }
    let kind_str = if raw.kind.trim().is_empty() {
        "feed"
    } else {
        raw.kind.trim()
    };
    let Some(kind) = SourceKind::parse(kind_str) else {
        bail!("source '{id}': unknown type '{kind_str}'");
    };
    let url = raw.url.trim().to_string();
    if url.is_empty() {
        bail!("source '{id}': missing url");
    }
    // Hazard endpoints may carry an {api_key} placeholder that only
    // resolves at fetch time; validate the others now.
    if kind != SourceKind::HazardApi && url::Url::parse(&url).is_err() {
        bail!("source '{id}': invalid url '{url}'");
    }
    Ok(Source {
        id,
        kind,
        url,
        category: if raw.category.trim().is_empty() {
            "breaking_market".to_string()
        } else {
            raw.category.trim().to_string()
        },
        tags: raw.tags.into_iter().filter(|t| !t.is_empty()).collect(),
        reliability: raw.reliability,
        enabled: raw.enabled,
        allow_html: raw.allow_html,
        max_items: raw.max_items.unwrap_or(defaults.max_items_per_feed),
        language: raw.language.unwrap_or_else(|| defaults.language.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = SignalsConfig::from_json(
            r#"{"sources":[{"id":"wires","url":"https://example.com/rss"}]}"#,
        )
        .unwrap();
        assert_eq!(cfg.sources.len(), 1);
        let s = &cfg.sources[0];
        assert_eq!(s.kind, SourceKind::Feed);
        assert_eq!(s.category, "breaking_market");
        assert_eq!(s.max_items, 40);
        assert!(s.enabled);
        assert_eq!(cfg.defaults.half_life_for("breaking_market"), 36.0);
        assert_eq!(cfg.defaults.half_life_for("unknown"), 72.0);
    }

    #[test]
    fn unknown_type_fails_fast() {
        let err = SignalsConfig::from_json(
            r#"{"sources":[{"id":"x","type":"carrier_pigeon","url":"https://example.com"}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown type"));
    }

    #[test]
    fn invalid_reliability_fails_fast() {
        let err = SignalsConfig::from_json(
            r#"{"sources":[{"id":"x","url":"https://example.com","reliability":1.5}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("reliability"));
    }

    #[test]
    fn duplicate_ids_fail_fast() {
        let err = SignalsConfig::from_json(
            r#"{"sources":[
                {"id":"x","url":"https://example.com/a"},
                {"id":"x","url":"https://example.com/b"}
            ]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn reliability_resolution_order() {
        let mut cfg = SignalsConfig::from_json(
            r#"{"reliability":{"wires":0.9},
                "sources":[
                  {"id":"wires","url":"https://example.com/rss"},
                  {"id":"other","url":"https://example.com/other"}
                ]}"#,
        )
        .unwrap();
        assert!((cfg.resolve_reliability(&cfg.sources[0].clone()) - 0.9).abs() < 1e-9);
        assert!(
            (cfg.resolve_reliability(&cfg.sources[1].clone()) - DEFAULT_RELIABILITY).abs() < 1e-9
        );
        cfg.sources[0].reliability = 0.5;
        assert!((cfg.resolve_reliability(&cfg.sources[0].clone()) - 0.5).abs() < 1e-9);
    }
}
