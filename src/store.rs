// src/store.rs
//! Document-store collaborator boundary plus an in-memory implementation.
//!
//! The store is the only component mutated across runs; everything else
//! (robots cache, dedup windows, scheduler queues) is process-local.
//! `MemoryStore` backs tests and the demo binary; production deployments
//! implement `DocumentStore` over their own keyed storage.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use chrono::{Duration, Utc};

use crate::embed::Chunk;
use crate::types::{DedupCandidate, Document, Trend};

#[derive(Debug, Clone, Default)]
pub struct DedupQuery {
    pub since_hours: i64,
    pub limit: usize,
    pub collection: String,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub collection: Option<String>,
    pub source_id: Option<String>,
    pub day_key: Option<String>,
    pub include_stale: bool,
    pub include_expired: bool,
    pub limit: Option<usize>,
}

/// Partial update; `None` fields are left untouched. `cluster_id` is
/// doubly optional so a patch can explicitly clear an assignment.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    pub freshness_score: Option<f64>,
    pub stale: Option<bool>,
    pub stale_reason: Option<String>,
    pub expired: Option<bool>,
    pub cleaned_text: Option<String>,
    pub summary_bullets: Option<Vec<String>>,
    pub cluster_id: Option<Option<String>>,
    pub cluster_label: Option<String>,
    pub chunk_count: Option<usize>,
}

pub trait DocumentStore: Send + Sync {
    fn upsert_document(&self, doc: &Document) -> Result<()>;
    fn get_document_by_hash(&self, hash: &str, collection: &str) -> Result<Option<Document>>;
    fn get_document_by_url(&self, url: &str) -> Result<Option<Document>>;
    fn list_dedup_candidates(&self, query: &DedupQuery) -> Result<Vec<DedupCandidate>>;
    fn update_document(&self, doc_id: &str, patch: &DocumentPatch) -> Result<()>;
    fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>>;
    fn upsert_chunks(&self, doc_id: &str, chunks: &[Chunk]) -> Result<()>;
    /// Drop the heavy derived index entries for an expired document.
    fn delete_document_chunks(&self, doc_id: &str) -> Result<()>;
    /// Replace the trend set for a run; earlier runs' trends are superseded.
    fn replace_trends(&self, run_id: &str, trends: &[Trend]) -> Result<()>;
}

#[derive(Default)]
struct MemoryInner {
    docs: HashMap<String, Document>,
    chunks: HashMap<String, Vec<Chunk>>,
    trends: Vec<(String, Vec<Trend>)>,
}

/// Mutex-guarded maps; enough fidelity for tests and local runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, doc_id: &str) -> Option<Document> {
        self.lock().docs.get(doc_id).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.lock().docs.len()
    }

    pub fn chunk_count(&self, doc_id: &str) -> usize {
        self.lock().chunks.get(doc_id).map(Vec::len).unwrap_or(0)
    }

    pub fn total_chunks(&self) -> usize {
        self.lock().chunks.values().map(Vec::len).sum()
    }

    pub fn trends_for(&self, run_id: &str) -> Vec<Trend> {
        self.lock()
            .trends
            .iter()
            .find(|(id, _)| id == run_id)
            .map(|(_, t)| t.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("memory store poisoned")
    }
}

impl DocumentStore for MemoryStore {
    fn upsert_document(&self, doc: &Document) -> Result<()> {
        self.lock().docs.insert(doc.doc_id.clone(), doc.clone());
        Ok(())
    }

    fn get_document_by_hash(&self, hash: &str, collection: &str) -> Result<Option<Document>> {
        Ok(self
            .lock()
            .docs
            .values()
            .find(|d| d.content_hash == hash && d.collection == collection)
            .cloned())
    }

    fn get_document_by_url(&self, url: &str) -> Result<Option<Document>> {
        Ok(self
            .lock()
            .docs
            .values()
            .find(|d| !d.canonical_url.is_empty() && d.canonical_url == url)
            .cloned())
    }

    fn list_dedup_candidates(&self, query: &DedupQuery) -> Result<Vec<DedupCandidate>> {
        let cutoff = Utc::now() - Duration::hours(query.since_hours.max(0));
        let mut rows: Vec<DedupCandidate> = self
            .lock()
            .docs
            .values()
            .filter(|d| d.collection == query.collection && d.retrieved_at >= cutoff)
            .map(|d| DedupCandidate {
                canonical_url: d.canonical_url.clone(),
                content_hash: d.content_hash.clone(),
                fingerprint: d.fingerprint.clone(),
                collection: d.collection.clone(),
                retrieved_at: d.retrieved_at,
            })
            .collect();
        // Both bounds apply: the time horizon above, the count cap below.
        rows.sort_by(|a, b| b.retrieved_at.cmp(&a.retrieved_at));
        rows.truncate(query.limit);
        Ok(rows)
    }

    fn update_document(&self, doc_id: &str, patch: &DocumentPatch) -> Result<()> {
        let mut inner = self.lock();
        let Some(doc) = inner.docs.get_mut(doc_id) else {
            anyhow::bail!("unknown document {doc_id}");
        };
        if let Some(v) = patch.freshness_score {
            doc.freshness_score = v;
        }
        if let Some(v) = patch.stale {
            doc.stale = v;
        }
        if let Some(v) = &patch.stale_reason {
            doc.stale_reason = v.clone();
        }
        if let Some(v) = patch.expired {
            doc.expired = v;
        }
        if let Some(v) = &patch.cleaned_text {
            doc.cleaned_text = v.clone();
        }
        if let Some(v) = &patch.summary_bullets {
            doc.summary_bullets = v.clone();
        }
        if let Some(v) = &patch.cluster_id {
            doc.cluster_id = v.clone();
        }
        if let Some(v) = &patch.cluster_label {
            doc.cluster_label = v.clone();
        }
        if let Some(v) = patch.chunk_count {
            doc.chunk_count = v;
        }
        Ok(())
    }

    fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        let inner = self.lock();
        let mut out: Vec<Document> = inner
            .docs
            .values()
            .filter(|d| {
                if let Some(c) = &filter.collection {
                    if &d.collection != c {
                        return false;
                    }
                }
                if let Some(s) = &filter.source_id {
                    if &d.source_id != s {
                        return false;
                    }
                }
                if let Some(k) = &filter.day_key {
                    if &d.day_key != k {
                        return false;
                    }
                }
                if !filter.include_stale && d.stale {
                    return false;
                }
                if !filter.include_expired && d.expired {
                    return false;
                }
                true
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn upsert_chunks(&self, doc_id: &str, chunks: &[Chunk]) -> Result<()> {
        self.lock().chunks.insert(doc_id.to_string(), chunks.to_vec());
        Ok(())
    }

    fn delete_document_chunks(&self, doc_id: &str) -> Result<()> {
        self.lock().chunks.remove(doc_id);
        Ok(())
    }

    fn replace_trends(&self, run_id: &str, trends: &[Trend]) -> Result<()> {
        let mut inner = self.lock();
        inner.trends.retain(|(id, _)| id != run_id);
        inner.trends.push((run_id.to_string(), trends.to_vec()));
        Ok(())
    }
}
