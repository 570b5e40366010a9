// src/fetch.rs
//! # Polite fetcher
//! Outbound HTTP with a hard per-attempt timeout, jittered exponential
//! backoff on transport errors and 429/5xx, `Retry-After` support, and
//! conditional-GET passthrough (304 is a distinct, successful outcome).
//!
//! A request that still fails after retries is an error the caller treats
//! as a per-item failure; nothing here aborts a whole run.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use metrics::counter;
use serde::Deserialize;

const JITTER_RATIO: f64 = 0.2;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub retries: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            min_delay_ms: 800,
            max_delay_ms: 8000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout_ms: u64,
    pub headers: Vec<(String, String)>,
    /// Prior validators for conditional GET.
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            headers: Vec::new(),
            etag: None,
            last_modified: None,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedText {
    pub status: u16,
    /// True for a 304; `body` is empty and callers skip re-processing.
    pub not_modified: bool,
    pub body: String,
    pub content_type: String,
    pub etag: String,
    pub last_modified: String,
}

#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub status: u16,
    pub not_modified: bool,
    pub body: Vec<u8>,
    pub content_type: String,
    pub etag: String,
    pub last_modified: String,
}

#[derive(Debug, Clone)]
pub struct PoliteFetcher {
    client: reqwest::Client,
    user_agent: String,
}

impl PoliteFetcher {
    pub fn new(user_agent: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agent: user_agent.to_string(),
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub async fn fetch_text(&self, url: &str, opts: &FetchOptions) -> Result<FetchedText> {
        let resp = self.send_with_retry(url, opts).await?;
        let status = resp.status().as_u16();
        let (content_type, etag, last_modified) = response_meta(&resp);
        if status == 304 {
            return Ok(FetchedText {
                status,
                not_modified: true,
                body: String::new(),
                content_type,
                etag,
                last_modified,
            });
        }
        if !resp.status().is_success() {
            counter!("fetch_errors_total").increment(1);
            bail!("http_{status} fetching {url}");
        }
        let body = resp
            .text()
            .await
            .with_context(|| format!("reading body of {url}"))?;
        Ok(FetchedText {
            status,
            not_modified: false,
            body,
            content_type,
            etag,
            last_modified,
        })
    }

    pub async fn fetch_bytes(&self, url: &str, opts: &FetchOptions) -> Result<FetchedBytes> {
        let resp = self.send_with_retry(url, opts).await?;
        let status = resp.status().as_u16();
        let (content_type, etag, last_modified) = response_meta(&resp);
        if status == 304 {
            return Ok(FetchedBytes {
                status,
                not_modified: true,
                body: Vec::new(),
                content_type,
                etag,
                last_modified,
            });
        }
        if !resp.status().is_success() {
            counter!("fetch_errors_total").increment(1);
            bail!("http_{status} fetching {url}");
        }
        let body = resp
            .bytes()
            .await
            .with_context(|| format!("reading body of {url}"))?
            .to_vec();
        Ok(FetchedBytes {
            status,
            not_modified: false,
            body,
            content_type,
            etag,
            last_modified,
        })
    }

    async fn send_with_retry(&self, url: &str, opts: &FetchOptions) -> Result<reqwest::Response> {
        let mut attempt: u32 = 0;
        loop {
            let mut req = self
                .client
                .get(url)
                .timeout(Duration::from_millis(opts.timeout_ms))
                .header(reqwest::header::USER_AGENT, &self.user_agent);
            for (name, value) in &opts.headers {
                req = req.header(name.as_str(), value.as_str());
            }
            if let Some(etag) = &opts.etag {
                req = req.header(reqwest::header::IF_NONE_MATCH, etag);
            }
            if let Some(lm) = &opts.last_modified {
                req = req.header(reqwest::header::IF_MODIFIED_SINCE, lm);
            }

            counter!("fetch_requests_total").increment(1);
            match req.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if !should_retry_status(status) || attempt >= opts.retry.retries {
                        return Ok(resp);
                    }
                    let delay = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| retry_after_delay(v, &opts.retry))
                        .unwrap_or_else(|| backoff_delay(attempt, &opts.retry));
                    counter!("fetch_retries_total").increment(1);
                    tracing::debug!(url, status, attempt, "retrying fetch");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if attempt >= opts.retry.retries {
                        counter!("fetch_errors_total").increment(1);
                        return Err(err).with_context(|| format!("fetching {url}"));
                    }
                    counter!("fetch_retries_total").increment(1);
                    tracing::debug!(url, error = %err, attempt, "retrying fetch after error");
                    tokio::time::sleep(backoff_delay(attempt, &opts.retry)).await;
                }
            }
            attempt += 1;
        }
    }
}

fn response_meta(resp: &reqwest::Response) -> (String, String, String) {
    let header = |name: reqwest::header::HeaderName| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    (
        header(reqwest::header::CONTENT_TYPE).to_lowercase(),
        header(reqwest::header::ETAG),
        header(reqwest::header::LAST_MODIFIED),
    )
}

fn should_retry_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// `min(max_delay, min_delay * 2^attempt)` with ±20% jitter.
fn backoff_delay(attempt: u32, retry: &RetryPolicy) -> Duration {
    let base = (retry.min_delay_ms as f64 * 2f64.powi(attempt as i32))
        .min(retry.max_delay_ms as f64);
    let jitter = base * JITTER_RATIO;
    let delay = (base - jitter + rand::random::<f64>() * jitter * 2.0).max(0.0);
    Duration::from_millis(delay as u64)
}

/// Seconds-form `Retry-After`, clamped to the policy's max delay.
fn retry_after_delay(value: &str, retry: &RetryPolicy) -> Option<Duration> {
    let secs: u64 = value.trim().parse().ok()?;
    if secs == 0 {
        return None;
    }
    Some(Duration::from_millis((secs * 1000).min(retry.max_delay_ms)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(should_retry_status(429));
        assert!(should_retry_status(500));
        assert!(should_retry_status(503));
        assert!(!should_retry_status(200));
        assert!(!should_retry_status(304));
        assert!(!should_retry_status(404));
    }

    #[test]
    fn backoff_grows_and_stays_within_jitter_band() {
        let retry = RetryPolicy {
            retries: 3,
            min_delay_ms: 100,
            max_delay_ms: 1000,
        };
        for attempt in 0..4 {
            let base = (100f64 * 2f64.powi(attempt)).min(1000.0);
            let d = backoff_delay(attempt as u32, &retry).as_millis() as f64;
            assert!(d >= base * 0.8 - 1.0, "attempt {attempt}: {d} < {}", base * 0.8);
            assert!(d <= base * 1.2 + 1.0, "attempt {attempt}: {d} > {}", base * 1.2);
        }
    }

    #[test]
    fn retry_after_is_clamped() {
        let retry = RetryPolicy {
            retries: 3,
            min_delay_ms: 100,
            max_delay_ms: 2000,
        };
        assert_eq!(
            retry_after_delay("1", &retry),
            Some(Duration::from_millis(1000))
        );
        assert_eq!(
            retry_after_delay("60", &retry),
            Some(Duration::from_millis(2000))
        );
        assert_eq!(retry_after_delay("soon", &retry), None);
    }
}
