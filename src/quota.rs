// src/quota.rs
//! # Quota enforcer
//! Soft per-source and per-cluster daily caps. Overflow beyond a cap is
//! demoted to stale (never deleted): documents are ranked by the
//! freshness-times-reliability score and everything past the cap is
//! marked with the matching stale reason.

use std::collections::HashMap;

use anyhow::Result;

use crate::freshness::rank_score;
use crate::store::{DocumentPatch, DocumentStore};
use crate::types::Document;

pub const STALE_REASON_SOURCE_CAP: &str = "source_cap";
pub const STALE_REASON_CLUSTER_CAP: &str = "cluster_cap";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QuotaOutcome {
    pub source_demoted: usize,
    pub cluster_demoted: usize,
}

fn demote_overflow(
    store: &dyn DocumentStore,
    groups: HashMap<(String, String), Vec<&Document>>,
    cap: usize,
    reason: &str,
) -> Result<usize> {
    let mut demoted = 0usize;
    for (_, mut group) in groups {
        if group.len() <= cap {
            continue;
        }
        // Best first; ties broken by doc_id so enforcement is stable.
        group.sort_by(|a, b| {
            rank_score(b.freshness_score, b.reliability_score)
                .partial_cmp(&rank_score(a.freshness_score, a.reliability_score))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        for doc in group.iter().skip(cap) {
            store.update_document(
                &doc.doc_id,
                &DocumentPatch {
                    stale: Some(true),
                    stale_reason: Some(reason.to_string()),
                    ..DocumentPatch::default()
                },
            )?;
            demoted += 1;
        }
    }
    Ok(demoted)
}

/// Apply both caps to today's documents. Must run after clustering so the
/// cluster grouping sees valid assignments. A cap of zero disables that
/// dimension.
pub fn enforce_caps(
    store: &dyn DocumentStore,
    todays_documents: &[Document],
    per_source_cap: usize,
    per_cluster_cap: usize,
) -> Result<QuotaOutcome> {
    let mut outcome = QuotaOutcome::default();

    if per_source_cap > 0 {
        let mut by_source_day: HashMap<(String, String), Vec<&Document>> = HashMap::new();
        for doc in todays_documents {
            by_source_day
                .entry((doc.source_id.clone(), doc.day_key.clone()))
                .or_default()
                .push(doc);
        }
        outcome.source_demoted =
            demote_overflow(store, by_source_day, per_source_cap, STALE_REASON_SOURCE_CAP)?;
    }

    if per_cluster_cap > 0 {
        let mut by_cluster_day: HashMap<(String, String), Vec<&Document>> = HashMap::new();
        for doc in todays_documents {
            let Some(cluster_id) = &doc.cluster_id else {
                continue;
            };
            by_cluster_day
                .entry((cluster_id.clone(), doc.day_key.clone()))
                .or_default()
                .push(doc);
        }
        outcome.cluster_demoted = demote_overflow(
            store,
            by_cluster_day,
            per_cluster_cap,
            STALE_REASON_CLUSTER_CAP,
        )?;
    }

    Ok(outcome)
}
