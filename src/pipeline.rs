// src/pipeline.rs
//! # Ingestion orchestrator
//! Drives one run end to end: pull items per source, dedup, tag, persist,
//! embed, then cluster the batch, curate the whole corpus, and enforce
//! daily caps. Item processing is deliberately sequential: the dedup
//! state (`seen_urls`, `seen_hashes`, the candidate window) must reflect
//! every earlier decision before the next one is made.
//!
//! A single source failing is recorded and skipped; the run's status is
//! `error` only when nothing was ingested and at least one error occurred.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;

use crate::cluster;
use crate::config::SignalsConfig;
use crate::dedup::{DedupEngine, DedupVerdict};
use crate::embed::EmbeddingService;
use crate::extract;
use crate::fetch::{FetchOptions, PoliteFetcher};
use crate::freshness::{self, FreshnessThresholds};
use crate::quota;
use crate::robots::RobotsGate;
use crate::run_log::{self, RunHandle};
use crate::scheduler::DomainScheduler;
use crate::sources::{AdapterRegistry, FetchContext};
use crate::store::{DocumentPatch, DocumentStore};
use crate::text;
use crate::types::{
    Document, RawItem, RunError, RunReport, RunStatus, Source, SourceStats,
};

pub const SKIP_SEEN_URL: &str = "seen_url";
pub const SKIP_ALREADY_INGESTED: &str = "already_ingested";
pub const SKIP_EMPTY: &str = "empty";
pub const SKIP_SOURCE_CAP: &str = "source_cap";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Only one ingestion run at a time; callers get a typed result
    /// instead of silently queueing behind a flag.
    #[error("an ingestion run is already in progress")]
    AlreadyRunning,
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict the run to these source ids; empty means all enabled.
    pub source_ids: Vec<String>,
    /// Re-ingest known URLs/hashes (resets expired documents too).
    pub force: bool,
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_items_total", "Items pulled from source adapters.");
        describe_counter!("ingest_ingested_total", "Documents admitted to the store.");
        describe_counter!("ingest_skipped_total", "Items skipped before persistence.");
        describe_counter!("ingest_dedup_total", "Items rejected by dedup.");
        describe_counter!("ingest_source_errors_total", "Source fetch/parse failures.");
        describe_counter!("ingest_runs_total", "Completed ingestion runs.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when the pipeline last finished a run."
        );
    });
}

pub struct IngestionPipeline {
    config: SignalsConfig,
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn EmbeddingService>,
    adapters: AdapterRegistry,
    fetcher: PoliteFetcher,
    robots: RobotsGate,
    scheduler: DomainScheduler,
    dedup: DedupEngine,
    data_dir: PathBuf,
    run_lock: tokio::sync::Mutex<()>,
}

impl IngestionPipeline {
    pub fn new(
        config: SignalsConfig,
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn EmbeddingService>,
        data_dir: PathBuf,
    ) -> Self {
        let fetcher = PoliteFetcher::new(&config.defaults.user_agent);
        let robots = RobotsGate::new(fetcher.clone());
        let scheduler = DomainScheduler::new(
            config.defaults.scheduler.max_concurrent,
            config.defaults.scheduler.max_per_origin,
            config.defaults.scheduler.min_delay_ms,
        );
        let dedup = DedupEngine::new(config.defaults.dedup.clone());
        Self {
            config,
            store,
            embedder,
            adapters: AdapterRegistry::builtin(),
            fetcher,
            robots,
            scheduler,
            dedup,
            data_dir,
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Swap or add an adapter (tests register stub adapters this way).
    pub fn register_adapter(&mut self, adapter: Box<dyn crate::sources::SourceAdapter>) {
        self.adapters.register(adapter);
    }

    pub fn config(&self) -> &SignalsConfig {
        &self.config
    }

    /// One full ingestion run. Returns `AlreadyRunning` without touching
    /// any state if another run holds the lock.
    pub async fn run(&self, opts: RunOptions) -> Result<RunReport, PipelineError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| PipelineError::AlreadyRunning)?;
        ensure_metrics_described();
        self.config
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let run = run_log::start_run(&self.data_dir).map_err(PipelineError::Other)?;
        tracing::info!(run_id = %run.run_id, "ingestion run started");

        let sources: Vec<&Source> = self
            .config
            .sources
            .iter()
            .filter(|s| s.enabled)
            .filter(|s| opts.source_ids.is_empty() || opts.source_ids.contains(&s.id))
            .collect();

        let mut report = RunReport {
            run_id: run.run_id.clone(),
            status: RunStatus::Running,
            started_at: run.started_at,
            finished_at: None,
            ingested: 0,
            skipped: 0,
            expired: 0,
            stale: 0,
            errors: Vec::new(),
            sources: Vec::new(),
            log_path: run.log_path.display().to_string(),
        };

        let mut seen_urls: HashSet<String> = HashSet::new();
        let mut seen_hashes: HashSet<String> = HashSet::new();
        let mut batch: Vec<(Document, Vec<f32>)> = Vec::new();

        for source in sources {
            run_log::append(&run, &format!("source_start {}", source.id));
            let mut stats = SourceStats::new(&source.id);
            let outcome = self
                .ingest_source(source, &opts, &mut seen_urls, &mut seen_hashes, &mut batch, &mut stats)
                .await;
            if let Err(err) = outcome {
                let message = format!("{err:#}");
                counter!("ingest_source_errors_total").increment(1);
                tracing::warn!(source = %source.id, error = %message, "source ingestion failed");
                stats.errors.push(message.clone());
                report.errors.push(RunError {
                    source: source.id.clone(),
                    error: message,
                });
            }
            report.ingested += stats.ingested;
            report.skipped += stats.skipped;
            run_log::append(
                &run,
                &format!(
                    "source_done {} pulled={} ingested={} skipped={}",
                    source.id, stats.pulled, stats.ingested, stats.skipped
                ),
            );
            report.sources.push(stats);
            // Inter-source politeness pause even off the scheduler path.
            tokio::time::sleep(Duration::from_millis(self.config.defaults.request_delay_ms)).await;
        }

        self.cluster_batch(&run, &mut batch)?;

        let thresholds: FreshnessThresholds = self.config.defaults.freshness;
        let curated = freshness::curate(
            self.store.as_ref(),
            &self.config.defaults.collection,
            |category| self.config.defaults.half_life_for(category),
            thresholds,
        )?;
        report.expired = curated.expired_count;
        report.stale = curated.stale_count;

        let todays: Vec<Document> = batch.iter().map(|(doc, _)| doc.clone()).collect();
        quota::enforce_caps(
            self.store.as_ref(),
            &todays,
            self.config.defaults.max_docs_per_source_per_day,
            self.config.defaults.max_docs_per_cluster_per_day,
        )?;

        report.status = if report.errors.is_empty() {
            RunStatus::Ok
        } else if report.ingested > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Error
        };
        report.finished_at = Some(Utc::now());

        run_log::append(
            &run,
            &format!(
                "run_done status={} ingested={} skipped={} expired={}",
                match report.status {
                    RunStatus::Ok => "ok",
                    RunStatus::Partial => "partial",
                    RunStatus::Error => "error",
                    RunStatus::Running => "running",
                },
                report.ingested,
                report.skipped,
                report.expired
            ),
        );
        run_log::finalize(&run, &report)?;

        counter!("ingest_runs_total").increment(1);
        counter!("ingest_ingested_total").increment(report.ingested as u64);
        counter!("ingest_skipped_total").increment(report.skipped as u64);
        gauge!("ingest_pipeline_last_run_ts").set(Utc::now().timestamp() as f64);
        tracing::info!(
            run_id = %report.run_id,
            status = ?report.status,
            ingested = report.ingested,
            skipped = report.skipped,
            "ingestion run finished"
        );
        Ok(report)
    }

    async fn ingest_source(
        &self,
        source: &Source,
        opts: &RunOptions,
        seen_urls: &mut HashSet<String>,
        seen_hashes: &mut HashSet<String>,
        batch: &mut Vec<(Document, Vec<f32>)>,
        stats: &mut SourceStats,
    ) -> Result<()> {
        let defaults = &self.config.defaults;
        let adapter = self
            .adapters
            .get(source.kind)
            .ok_or_else(|| anyhow!("no adapter registered for kind {:?}", source.kind))?;
        let ctx = FetchContext {
            fetcher: &self.fetcher,
            robots: &self.robots,
            scheduler: &self.scheduler,
            defaults,
        };
        let items = adapter.fetch_items(source, &ctx).await?;
        stats.pulled = items.len();

        for (index, item) in items.iter().enumerate() {
            if stats.ingested >= source.max_items {
                let remaining = items.len() - index;
                stats.skipped += remaining;
                for _ in 0..remaining {
                    stats.skip_reasons.push(SKIP_SOURCE_CAP.to_string());
                }
                break;
            }

            let canonical_url = text::normalize_url(&item.canonical_url)
                .or_else(|| text::normalize_url(&item.source_url))
                .unwrap_or_default();
            if !canonical_url.is_empty() {
                if !seen_urls.insert(canonical_url.clone()) {
                    self.skip(stats, SKIP_SEEN_URL);
                    continue;
                }
                if !opts.force {
                    if let Some(existing) = self.store.get_document_by_url(&canonical_url)? {
                        tracing::debug!(doc_id = %existing.doc_id, "url already on record");
                        self.skip(stats, SKIP_ALREADY_INGESTED);
                        continue;
                    }
                }
            }

            let combined = [&item.title, &item.summary, &item.content]
                .iter()
                .filter(|s| !s.is_empty())
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let raw_text = text::normalize_text(&combined);
            let page_html = self.fetch_full_text(item, source, &canonical_url).await;
            let cleaned = match &page_html {
                Some(html) => text::clean_text(html),
                None => text::clean_text(&raw_text),
            };
            let cleaned = if cleaned.is_empty() {
                text::normalize_text(&item.summary)
            } else {
                cleaned
            };
            let trimmed = text::limit_text(&cleaned, defaults.max_doc_chars);
            if trimmed.is_empty() {
                // Permanent item error: nothing extractable, no retry.
                self.skip(stats, SKIP_EMPTY);
                continue;
            }

            let verdict = self.dedup.check(
                &trimmed,
                &defaults.collection,
                self.store.as_ref(),
                seen_hashes,
                opts.force,
            );
            let (content_hash, fingerprint) = match verdict {
                DedupVerdict::Duplicate { reason } => {
                    counter!("ingest_dedup_total").increment(1);
                    self.skip(stats, reason);
                    continue;
                }
                DedupVerdict::Unique {
                    content_hash,
                    fingerprint,
                } => (content_hash, fingerprint),
            };

            let title = if item.title.is_empty() {
                source.id.clone()
            } else {
                item.title.clone()
            };
            let published_at = item.published_at;
            let effective_published = published_at.unwrap_or(item.retrieved_at);
            let seed = if canonical_url.is_empty() {
                format!(
                    "{}:{}:{}:{}",
                    source.id,
                    title,
                    effective_published.to_rfc3339(),
                    &content_hash[..8]
                )
            } else {
                canonical_url.clone()
            };
            let doc_id = crate::types::doc_id_for_seed(&seed);

            let tag_text = format!("{title}\n{trimmed}");
            let entities = extract::extract_entities(&tag_text);
            let signal_tags = extract::derive_signal_tags(&tag_text);
            let mut tags = source.tags.clone();
            for tag in signal_tags.iter().chain(entities.event_types.iter()) {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }

            let reliability = self.config.resolve_reliability(source);
            let half_life = defaults.half_life_for(&source.category);
            let freshness_score = freshness::freshness_score(Some(effective_published), half_life);

            let chunks = self.embedder.chunk(&trimmed);
            if chunks.is_empty() {
                self.skip(stats, SKIP_EMPTY);
                continue;
            }

            let doc = Document {
                doc_id: doc_id.clone(),
                collection: defaults.collection.clone(),
                source_id: source.id.clone(),
                source_title: item.source_title.clone(),
                source_url: item.source_url.clone(),
                canonical_url,
                title: title.clone(),
                summary: item.summary.clone(),
                cleaned_text: trimmed.clone(),
                content_hash,
                fingerprint: fingerprint.clone(),
                published_at,
                retrieved_at: item.retrieved_at,
                language: item.language.clone(),
                category: source.category.clone(),
                tags,
                signal_tags,
                entities,
                freshness_score,
                reliability_score: reliability,
                stale: false,
                stale_reason: String::new(),
                expired: false,
                summary_bullets: Vec::new(),
                cluster_id: None,
                cluster_label: String::new(),
                day_key: text::day_key(effective_published),
                chunk_count: chunks.len(),
            };

            self.store.upsert_chunks(&doc_id, &chunks)?;
            self.store.upsert_document(&doc)?;

            let embed_input = format!(
                "{title}\n{}\n{}",
                item.summary,
                text::limit_text(&trimmed, 1200)
            );
            let embedding = self
                .embedder
                .embed(&embed_input)
                .await
                .context("embedding document")?;
            batch.push((doc, embedding));
            self.dedup.admit(&defaults.collection, &fingerprint);
            stats.ingested += 1;
        }
        Ok(())
    }

    fn skip(&self, stats: &mut SourceStats, reason: &str) {
        stats.skipped += 1;
        stats.skip_reasons.push(reason.to_string());
    }

    /// Robots-gated full-page fetch for feed items whose source allows it.
    /// Any failure falls back to the feed-provided text.
    async fn fetch_full_text(
        &self,
        item: &RawItem,
        source: &Source,
        canonical_url: &str,
    ) -> Option<String> {
        if !source.allow_html || !item.allow_html {
            return None;
        }
        let url = if canonical_url.is_empty() {
            item.source_url.as_str()
        } else {
            canonical_url
        };
        if url.is_empty() || url.to_lowercase().ends_with(".pdf") {
            return None;
        }
        if !self.robots.allows(url).await {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(self.config.defaults.request_delay_ms)).await;
        let opts = FetchOptions {
            timeout_ms: self.config.defaults.fetch_timeout_ms,
            retry: self.config.defaults.retry,
            ..FetchOptions::default()
        };
        match self.fetcher.fetch_text(url, &opts).await {
            Ok(fetched) if !fetched.not_modified && !fetched.body.is_empty() => Some(fetched.body),
            Ok(_) => None,
            Err(err) => {
                tracing::debug!(url, error = %err, "full-text fetch failed; using feed text");
                None
            }
        }
    }

    /// Cluster the run's batch, persist trends, and write cluster
    /// assignments back to both the store and the in-memory batch (the
    /// quota pass needs them).
    fn cluster_batch(
        &self,
        run: &RunHandle,
        batch: &mut [(Document, Vec<f32>)],
    ) -> Result<(), PipelineError> {
        let defaults = &self.config.defaults;
        let embedded: Vec<usize> = batch
            .iter()
            .enumerate()
            .filter(|(_, (_, v))| !v.is_empty())
            .map(|(i, _)| i)
            .collect();
        if embedded.is_empty() {
            return Ok(());
        }
        let vectors: Vec<Vec<f32>> = embedded.iter().map(|i| batch[*i].1.clone()).collect();
        let docs: Vec<Document> = embedded.iter().map(|i| batch[*i].0.clone()).collect();

        let km = cluster::kmeans(&vectors, defaults.cluster_count, defaults.cluster_iterations);
        let (trends, mapping) = cluster::build_trends(&docs, &km.assignments, defaults.min_cluster_docs);

        if !trends.is_empty() {
            self.store.replace_trends(&run.run_id, &trends)?;
            run_log::append(run, &format!("trends_built count={}", trends.len()));
        }
        let labels: std::collections::HashMap<&str, &str> = trends
            .iter()
            .map(|t| (t.cluster_id.as_str(), t.label.as_str()))
            .collect();

        for i in embedded {
            let doc_id = batch[i].0.doc_id.clone();
            let cluster_id = mapping.get(&doc_id).cloned();
            let label = cluster_id
                .as_deref()
                .and_then(|id| labels.get(id))
                .map(|l| l.to_string())
                .unwrap_or_default();
            self.store.update_document(
                &doc_id,
                &DocumentPatch {
                    cluster_id: Some(cluster_id.clone()),
                    cluster_label: Some(label.clone()),
                    ..DocumentPatch::default()
                },
            )?;
            batch[i].0.cluster_id = cluster_id;
            batch[i].0.cluster_label = label;
        }
        Ok(())
    }
}
