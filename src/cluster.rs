// src/cluster.rs
//! # Trend clusterer
//! Cosine k-means over document embedding vectors with a fixed iteration
//! count (bounded cost beats exact convergence here), minimum-cluster-size
//! filtering, keyword labels, and a templated rationale per trend.

use std::collections::HashMap;

use rand::Rng;

use crate::freshness::rank_score;
use crate::text;
use crate::types::{Document, Trend};

const LABEL_KEYWORDS: usize = 4;
const MAX_TOP_ENTITIES: usize = 8;
const MAX_TOP_TICKERS: usize = 8;
const MAX_TREND_SIGNAL_TAGS: usize = 6;

/// Cosine distance in [0,2]; zero-norm vectors are maximally distant
/// from everything (distance 1).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for i in 0..a.len().min(b.len()) {
        let va = a[i] as f64;
        let vb = b[i] as f64;
        dot += va * vb;
        norm_a += va * va;
        norm_b += vb * vb;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 1.0;
    }
    1.0 - dot / denom
}

pub fn mean_vector(vectors: &[&Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let dim = first.len();
    let mut mean = vec![0f32; dim];
    for vec in vectors {
        for (i, v) in vec.iter().take(dim).enumerate() {
            mean[i] += v;
        }
    }
    let n = vectors.len() as f32;
    for v in &mut mean {
        *v /= n;
    }
    mean
}

#[derive(Debug, Clone, Default)]
pub struct KmeansResult {
    pub assignments: Vec<usize>,
    pub centroids: Vec<Vec<f32>>,
}

/// Standard k-means with k distinct random initial centroids (k clamped
/// to the vector count) and no convergence check: a fixed number of
/// assign/recompute rounds. Empty clusters keep their previous centroid.
pub fn kmeans(vectors: &[Vec<f32>], k: usize, iterations: usize) -> KmeansResult {
    if vectors.is_empty() {
        return KmeansResult::default();
    }
    let k = k.clamp(1, vectors.len());
    let mut rng = rand::rng();
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    let mut used = std::collections::HashSet::new();
    while centroids.len() < k {
        let idx = rng.random_range(0..vectors.len());
        if used.insert(idx) {
            centroids.push(vectors[idx].clone());
        }
    }

    let mut assignments = vec![0usize; vectors.len()];
    for _ in 0..iterations {
        for (i, vec) in vectors.iter().enumerate() {
            let mut best = 0usize;
            let mut best_dist = f64::INFINITY;
            for (ci, centroid) in centroids.iter().enumerate() {
                let dist = cosine_distance(vec, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best = ci;
                }
            }
            assignments[i] = best;
        }
        for (ci, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&Vec<f32>> = vectors
                .iter()
                .enumerate()
                .filter(|(i, _)| assignments[*i] == ci)
                .map(|(_, v)| v)
                .collect();
            if !members.is_empty() {
                *centroid = mean_vector(&members);
            }
        }
    }
    KmeansResult {
        assignments,
        centroids,
    }
}

/// Priority-ordered rationale: the first rule whose tag set intersects
/// the trend's aggregated signal tags wins.
pub fn trend_note(signal_tags: &[String]) -> &'static str {
    let has = |tag: &str| signal_tags.iter().any(|t| t == tag);
    if has("energy_supply") || has("energy_inventory") {
        return "Energy supply and inventory signals can move fuel prices and transport costs.";
    }
    if has("shipping_disruption") {
        return "Shipping disruptions can ripple into delivery times, inventories, and price volatility.";
    }
    if has("extreme_weather") || has("wildfire_risk") || has("drought_risk") {
        return "Severe weather risk can disrupt operations, logistics, and commodity supply.";
    }
    if has("regulatory_risk") {
        return "Regulatory shifts may impact compliance costs and sector sentiment.";
    }
    "Monitor for second-order impacts across markets and supply chains."
}

fn push_unique_capped(out: &mut Vec<String>, value: &str, cap: usize) {
    if out.len() < cap && !value.is_empty() && !out.iter().any(|v| v == value) {
        out.push(value.to_string());
    }
}

/// Group documents by cluster assignment, discard clusters smaller than
/// `min_cluster_docs` (their documents stay unclustered), and build one
/// `Trend` per survivor. Returns the trends plus the doc-id -> cluster-id
/// map for surviving clusters only.
pub fn build_trends(
    docs: &[Document],
    assignments: &[usize],
    min_cluster_docs: usize,
) -> (Vec<Trend>, HashMap<String, String>) {
    let mut clusters: HashMap<usize, Vec<&Document>> = HashMap::new();
    for (i, doc) in docs.iter().enumerate() {
        let Some(cluster_idx) = assignments.get(i) else {
            continue;
        };
        clusters.entry(*cluster_idx).or_default().push(doc);
    }

    let mut indices: Vec<usize> = clusters.keys().copied().collect();
    indices.sort_unstable();

    let mut trends = Vec::new();
    let mut mapping = HashMap::new();
    for cluster_idx in indices {
        let members = &clusters[&cluster_idx];
        if members.len() < min_cluster_docs.max(1) {
            continue;
        }
        let cluster_id = format!("cluster_{}", cluster_idx + 1);

        let titles = members
            .iter()
            .map(|d| d.title.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let keywords = text::extract_keywords(&titles, LABEL_KEYWORDS);
        let label = if keywords.is_empty() {
            format!("Cluster {}", cluster_idx + 1)
        } else {
            keywords.join(" ")
        };

        let representative = members
            .iter()
            .max_by(|a, b| {
                rank_score(a.freshness_score, a.reliability_score)
                    .partial_cmp(&rank_score(b.freshness_score, b.reliability_score))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.doc_id.cmp(&a.doc_id))
            })
            .expect("cluster has members");

        let mut top_entities = Vec::new();
        let mut top_tickers = Vec::new();
        let mut signal_tags = Vec::new();
        for doc in members.iter() {
            for e in &doc.entities.organizations {
                push_unique_capped(&mut top_entities, e, MAX_TOP_ENTITIES);
            }
            for e in &doc.entities.commodities {
                push_unique_capped(&mut top_entities, e, MAX_TOP_ENTITIES);
            }
            for t in &doc.entities.tickers {
                push_unique_capped(&mut top_tickers, t, MAX_TOP_TICKERS);
            }
            for t in &doc.signal_tags {
                push_unique_capped(&mut signal_tags, t, MAX_TREND_SIGNAL_TAGS);
            }
            mapping.insert(doc.doc_id.clone(), cluster_id.clone());
        }

        let note = trend_note(&signal_tags).to_string();
        trends.push(Trend {
            cluster_id,
            label,
            representative_doc_id: representative.doc_id.clone(),
            representative_title: representative.title.clone(),
            top_entities,
            top_tickers,
            signal_tags,
            doc_count: members.len(),
            note,
        });
    }
    (trends, mapping)
}
