// src/dedup.rs
//! # Dedup engine
//! Two-tier duplicate detection: exact match on a SHA-256 content hash,
//! and near-duplicate match via a 64-bit simhash fingerprint compared by
//! Hamming distance against a rolling window of recent candidates.
//!
//! The candidate window is bounded by BOTH a lookback horizon and a count
//! limit; the stricter bound wins. Malformed stored fingerprints are
//! skipped (fail open): over-ingestion beats silently dropping documents.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::store::{DedupQuery, DocumentStore};
use crate::text;

pub const REASON_EXACT: &str = "dedup_exact";
pub const REASON_SIMHASH: &str = "dedup_simhash";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Max Hamming distance (of 64 bits) still considered a duplicate.
    pub simhash_distance: u32,
    pub lookback_hours: i64,
    pub max_candidates: usize,
    pub cache_ttl_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            simhash_distance: 3,
            lookback_hours: 96,
            max_candidates: 1500,
            cache_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupVerdict {
    Unique {
        content_hash: String,
        fingerprint: String,
    },
    Duplicate {
        reason: &'static str,
    },
}

/// SHA-256 hex of the cleaned text; the exact-duplicate key.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex_encode(&digest)
}

/// First 8 bytes of SHA-256, big-endian, as the per-token 64-bit hash.
pub(crate) fn token_hash64(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut value = 0u64;
    for byte in digest.iter().take(8) {
        value = (value << 8) | u64::from(*byte);
    }
    value
}

/// Simhash over the shared token stream: per-bit signed votes across all
/// token hashes, sign decides the output bit. `None` when no token
/// survives tokenization (short-document guard).
pub fn simhash64(input: &str) -> Option<u64> {
    let tokens = text::tokenize(input);
    if tokens.is_empty() {
        return None;
    }
    let mut votes = [0i64; 64];
    for token in &tokens {
        let hash = token_hash64(token);
        for (i, vote) in votes.iter_mut().enumerate() {
            let bit = (hash >> (63 - i)) & 1;
            *vote += if bit == 1 { 1 } else { -1 };
        }
    }
    let mut result = 0u64;
    for (i, vote) in votes.iter().enumerate() {
        if *vote >= 0 {
            result |= 1u64 << (63 - i);
        }
    }
    Some(result)
}

/// 16-hex-char rendering of the fingerprint; empty when there is none.
pub fn fingerprint_hex(input: &str) -> String {
    simhash64(input)
        .map(|h| format!("{h:016x}"))
        .unwrap_or_default()
}

pub fn parse_fingerprint(hex: &str) -> Option<u64> {
    if hex.len() != 16 {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

struct Window {
    fetched_at: Instant,
    fingerprints: Vec<u64>,
}

/// Exact + near-duplicate checks with a short-lived per-collection
/// candidate cache refreshed from the document store.
pub struct DedupEngine {
    cfg: DedupConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl DedupEngine {
    pub fn new(cfg: DedupConfig) -> Self {
        Self {
            cfg,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.cfg
    }

    /// Decide whether `cleaned_text` duplicates prior content.
    ///
    /// `seen_hashes` is the caller's in-run hash set; it must reflect all
    /// earlier admissions in this run, which is why item processing is
    /// sequential. With `force`, store-level exact matches are ignored
    /// (re-ingestion) but in-run repeats still dedup.
    pub fn check(
        &self,
        cleaned_text: &str,
        collection: &str,
        store: &dyn DocumentStore,
        seen_hashes: &mut HashSet<String>,
        force: bool,
    ) -> DedupVerdict {
        let hash = content_hash(cleaned_text);
        if !seen_hashes.insert(hash.clone()) {
            return DedupVerdict::Duplicate {
                reason: REASON_EXACT,
            };
        }
        if !force {
            match store.get_document_by_hash(&hash, collection) {
                Ok(Some(_)) => {
                    return DedupVerdict::Duplicate {
                        reason: REASON_EXACT,
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "hash lookup failed; treating as unique");
                }
            }
        }

        let fingerprint = fingerprint_hex(cleaned_text);
        if let Some(fp) = parse_fingerprint(&fingerprint) {
            let near = self.with_window(collection, store, |candidates| {
                candidates
                    .iter()
                    .any(|other| hamming(fp, *other) <= self.cfg.simhash_distance)
            });
            if near {
                return DedupVerdict::Duplicate {
                    reason: REASON_SIMHASH,
                };
            }
        }
        DedupVerdict::Unique {
            content_hash: hash,
            fingerprint,
        }
    }

    /// Admit a freshly accepted document's fingerprint into the live
    /// window so later items in the same run compare against it.
    pub fn admit(&self, collection: &str, fingerprint: &str) {
        let Some(fp) = parse_fingerprint(fingerprint) else {
            return;
        };
        let mut windows = self.windows.lock().expect("dedup window poisoned");
        windows
            .entry(collection.to_string())
            .or_insert_with(|| Window {
                fetched_at: Instant::now(),
                fingerprints: Vec::new(),
            })
            .fingerprints
            .push(fp);
    }

    fn with_window<R>(
        &self,
        collection: &str,
        store: &dyn DocumentStore,
        f: impl FnOnce(&[u64]) -> R,
    ) -> R {
        let mut windows = self.windows.lock().expect("dedup window poisoned");
        let ttl = Duration::from_secs(self.cfg.cache_ttl_secs);
        let stale = windows
            .get(collection)
            .map(|w| w.fetched_at.elapsed() > ttl)
            .unwrap_or(true);
        if stale {
            let rows = store
                .list_dedup_candidates(&DedupQuery {
                    since_hours: self.cfg.lookback_hours,
                    limit: self.cfg.max_candidates,
                    collection: collection.to_string(),
                })
                .unwrap_or_else(|err| {
                    tracing::warn!(error = %err, "dedup candidate listing failed; empty window");
                    Vec::new()
                });
            let mut fingerprints = Vec::with_capacity(rows.len());
            for row in &rows {
                if row.fingerprint.is_empty() {
                    continue;
                }
                match parse_fingerprint(&row.fingerprint) {
                    Some(fp) => fingerprints.push(fp),
                    None => {
                        tracing::warn!(
                            url = %row.canonical_url,
                            "malformed stored fingerprint; skipping candidate"
                        );
                    }
                }
            }
            windows.insert(
                collection.to_string(),
                Window {
                    fetched_at: Instant::now(),
                    fingerprints,
                },
            );
        }
        f(windows
            .get(collection)
            .map(|w| w.fingerprints.as_slice())
            .unwrap_or(&[]))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let text = "Crude oil inventories fell sharply as refinery output climbed";
        let a = simhash64(text).unwrap();
        let b = simhash64(text).unwrap();
        assert_eq!(a, b);
        assert_eq!(hamming(a, b), 0);
    }

    #[test]
    fn no_fingerprint_for_empty_token_stream() {
        assert_eq!(simhash64(""), None);
        assert_eq!(simhash64("a an to"), None);
        assert_eq!(fingerprint_hex("a an to"), "");
    }

    #[test]
    fn fingerprint_roundtrips_through_hex() {
        let text = "Port congestion delays container shipping schedules";
        let hex = fingerprint_hex(text);
        assert_eq!(hex.len(), 16);
        assert_eq!(parse_fingerprint(&hex), simhash64(text));
    }

    #[test]
    fn malformed_fingerprints_do_not_parse() {
        assert_eq!(parse_fingerprint(""), None);
        assert_eq!(parse_fingerprint("xyz"), None);
        assert_eq!(parse_fingerprint("00000000000000000000"), None);
    }

    #[test]
    fn content_hash_is_sha256_hex() {
        let h = content_hash("abc");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hamming_counts_differing_bits() {
        assert_eq!(hamming(0, 0), 0);
        assert_eq!(hamming(0b1011, 0b0010), 2);
        assert_eq!(hamming(u64::MAX, 0), 64);
    }
}
