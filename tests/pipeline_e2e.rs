// tests/pipeline_e2e.rs
// End-to-end ingestion over a stub adapter: near-duplicate rejection,
// idempotent re-runs, force re-ingestion of expired documents, run-report
// accounting, and the run lock.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};

use signal_harvester::config::SignalsConfig;
use signal_harvester::dedup::{content_hash, fingerprint_hex};
use signal_harvester::embed::HashingEmbedder;
use signal_harvester::pipeline::{IngestionPipeline, PipelineError, RunOptions};
use signal_harvester::sources::{FetchContext, SourceAdapter};
use signal_harvester::store::{DocumentStore, MemoryStore};
use signal_harvester::types::{Document, Entities, RawItem, RunStatus, Source, SourceKind};

// Five content tokens repeated six times each (only stopword filler
// otherwise), so the rewrite's short suffix cannot move the fingerprint
// past the distance threshold.
const ARTICLE: &str = "Hurricane over the gulf: refinery shutdown after output. \
Hurricane over the gulf: refinery shutdown after output. \
Hurricane over the gulf: refinery shutdown after output. \
Hurricane over the gulf: refinery shutdown after output. \
Hurricane over the gulf: refinery shutdown after output. \
Hurricane over the gulf: refinery shutdown after output.";

const UNRELATED: &str = "Quarterly earnings beat expectations as software subscriptions \
expanded across enterprise customers and cloud margins improved measurably.";

struct StubFeed {
    items: Vec<RawItem>,
    /// Artificial pull latency so lock-contention tests have a window.
    delay_ms: u64,
}

#[async_trait]
impl SourceAdapter for StubFeed {
    fn kind(&self) -> SourceKind {
        SourceKind::Feed
    }

    async fn fetch_items(&self, _source: &Source, _ctx: &FetchContext<'_>) -> Result<Vec<RawItem>> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        Ok(self.items.clone())
    }
}

fn raw_item(id: &str, title: &str, content: &str) -> RawItem {
    RawItem {
        source_id: "wires".into(),
        source_title: "Wires".into(),
        source_url: "https://wires.example/rss".into(),
        canonical_url: format!("https://wires.example/articles/{id}"),
        title: title.into(),
        summary: String::new(),
        content: content.into(),
        published_at: Some(Utc::now()),
        retrieved_at: Utc::now(),
        language: "en".into(),
        category: "breaking_market".into(),
        tags: vec![],
        allow_html: false,
    }
}

fn test_config() -> SignalsConfig {
    let mut config = SignalsConfig::default();
    config.defaults.request_delay_ms = 1;
    config.sources.push(Source {
        id: "wires".into(),
        kind: SourceKind::Feed,
        url: "https://wires.example/rss".into(),
        category: "breaking_market".into(),
        tags: vec![],
        reliability: 0.8,
        enabled: true,
        allow_html: false,
        max_items: 40,
        language: "en".into(),
    });
    config
}

fn temp_data_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "signal-harvester-test-{label}-{}-{}",
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ))
}

fn build_pipeline(
    store: Arc<MemoryStore>,
    data_dir: PathBuf,
    items: Vec<RawItem>,
) -> IngestionPipeline {
    build_pipeline_with_delay(store, data_dir, items, 0)
}

fn build_pipeline_with_delay(
    store: Arc<MemoryStore>,
    data_dir: PathBuf,
    items: Vec<RawItem>,
    delay_ms: u64,
) -> IngestionPipeline {
    let mut pipeline = IngestionPipeline::new(
        test_config(),
        store,
        Arc::new(HashingEmbedder::default()),
        data_dir,
    );
    pipeline.register_adapter(Box::new(StubFeed { items, delay_ms }));
    pipeline
}

fn three_item_batch() -> Vec<RawItem> {
    vec![
        raw_item("original", "Refinery shutdown looms", ARTICLE),
        raw_item(
            "rewrite",
            "Refinery shutdown looms",
            &format!("{ARTICLE} Read further updates soon."),
        ),
        raw_item("other", "Earnings season surprises", UNRELATED),
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn near_duplicate_rewrite_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    let data_dir = temp_data_dir("neardup");
    let pipeline = build_pipeline(store.clone(), data_dir.clone(), three_item_batch());

    let report = pipeline.run(RunOptions::default()).await.unwrap();
    assert_eq!(report.status, RunStatus::Ok);
    assert_eq!(report.ingested, 2);
    assert_eq!(report.skipped, 1);
    assert!(report.errors.is_empty());

    let stats = &report.sources[0];
    assert_eq!(stats.pulled, 3);
    assert_eq!(stats.skip_reasons, vec!["dedup_simhash".to_string()]);

    // Originals persisted, the rewrite absent.
    assert_eq!(store.document_count(), 2);
    for id in ["original", "other"] {
        let url = format!("https://wires.example/articles/{id}");
        assert!(
            store.get_document_by_url(&url).unwrap().is_some(),
            "{url} should be stored"
        );
    }
    assert!(store
        .get_document_by_url("https://wires.example/articles/rewrite")
        .unwrap()
        .is_none());

    // Run artifacts exist and narrate the lifecycle.
    let log = std::fs::read_to_string(&report.log_path).unwrap();
    assert!(log.contains("run_start"));
    assert!(log.contains("source_start wires"));
    assert!(log.contains("source_done wires pulled=3 ingested=2 skipped=1"));
    assert!(log.contains("run_done status=ok"));

    std::fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_run_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let data_dir = temp_data_dir("idempotent");
    let pipeline = build_pipeline(store.clone(), data_dir.clone(), three_item_batch());

    let first = pipeline.run(RunOptions::default()).await.unwrap();
    assert_eq!(first.ingested, 2);
    let chunks_after_first = store.total_chunks();
    assert!(chunks_after_first > 0);

    let second = pipeline.run(RunOptions::default()).await.unwrap();
    assert_eq!(second.ingested, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(second.status, RunStatus::Ok);
    let reasons = &second.sources[0].skip_reasons;
    assert_eq!(
        reasons.iter().filter(|r| *r == "already_ingested").count(),
        2
    );
    assert_eq!(reasons.iter().filter(|r| *r == "dedup_simhash").count(), 1);

    // No new documents, chunks, or embeddings.
    assert_eq!(store.document_count(), 2);
    assert_eq!(store.total_chunks(), chunks_after_first);

    std::fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn force_resets_an_expired_document() {
    let store = Arc::new(MemoryStore::new());
    let data_dir = temp_data_dir("force");

    // An expired tombstone from long ago: same URL and content as the
    // incoming item, but retrieved far outside the dedup lookback window.
    let old = Utc::now() - Duration::days(60);
    let url = "https://wires.example/articles/original";
    store
        .upsert_document(&Document {
            // Same id the pipeline will derive, so the upsert replaces it.
            doc_id: signal_harvester::types::doc_id_for_seed(url),
            collection: "signals".into(),
            source_id: "wires".into(),
            source_title: "Wires".into(),
            source_url: "https://wires.example/rss".into(),
            canonical_url: "https://wires.example/articles/original".into(),
            title: "Refinery shutdown looms".into(),
            summary: String::new(),
            cleaned_text: String::new(),
            content_hash: content_hash(ARTICLE),
            fingerprint: fingerprint_hex(ARTICLE),
            published_at: Some(old),
            retrieved_at: old,
            language: "en".into(),
            category: "breaking_market".into(),
            tags: vec![],
            signal_tags: vec![],
            entities: Entities::default(),
            freshness_score: 0.01,
            reliability_score: 0.8,
            stale: true,
            stale_reason: "expired".into(),
            expired: true,
            summary_bullets: vec!["Old bullet.".into()],
            cluster_id: None,
            cluster_label: String::new(),
            day_key: "2026-06-08".into(),
            chunk_count: 0,
        })
        .unwrap();

    let items = vec![raw_item("original", "Refinery shutdown looms", ARTICLE)];
    let pipeline = build_pipeline(store.clone(), data_dir.clone(), items);

    // Without force the known URL short-circuits.
    let plain = pipeline.run(RunOptions::default()).await.unwrap();
    assert_eq!(plain.ingested, 0);
    assert_eq!(
        plain.sources[0].skip_reasons,
        vec!["already_ingested".to_string()]
    );
    assert!(store.get_document_by_url("https://wires.example/articles/original").unwrap().unwrap().expired);

    // With force the document is rebuilt fresh; expiry resets.
    let forced = pipeline
        .run(RunOptions {
            source_ids: vec![],
            force: true,
        })
        .await
        .unwrap();
    assert_eq!(forced.ingested, 1);
    let revived = store
        .get_document_by_url("https://wires.example/articles/original")
        .unwrap()
        .unwrap();
    assert!(!revived.expired);
    assert!(!revived.cleaned_text.is_empty());

    std::fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_runs_get_a_typed_rejection() {
    let store = Arc::new(MemoryStore::new());
    let data_dir = temp_data_dir("runlock");
    let pipeline = Arc::new(build_pipeline_with_delay(
        store,
        data_dir.clone(),
        three_item_batch(),
        200,
    ));

    let first = {
        let p = pipeline.clone();
        tokio::spawn(async move { p.run(RunOptions::default()).await })
    };
    // Give the first run a moment to take the lock; its stubbed source
    // pull keeps the lock held well past this point.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let second = pipeline.run(RunOptions::default()).await;
    assert!(matches!(second, Err(PipelineError::AlreadyRunning)));

    first.await.unwrap().unwrap();
    std::fs::remove_dir_all(&data_dir).ok();
}
