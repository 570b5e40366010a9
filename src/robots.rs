// src/robots.rs
//! # Robots gate
//! Fetches, parses, and caches per-origin robots.txt directives. The cache
//! lives inside the `RobotsGate` value and is held for the process
//! lifetime; a fetch failure caches a permissive `None` (fail open).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::fetch::{FetchOptions, PoliteFetcher, RetryPolicy};
use crate::text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    Allow,
    Disallow,
}

#[derive(Debug, Clone)]
struct Rule {
    kind: RuleKind,
    path: String,
}

#[derive(Debug, Clone, Default)]
struct RuleGroup {
    agents: Vec<String>,
    rules: Vec<Rule>,
    crawl_delay: Option<f64>,
}

/// Parsed robots.txt for one origin.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    groups: Vec<RuleGroup>,
}

impl RobotsRules {
    /// Parse the raw file. Consecutive `User-agent` lines share a group;
    /// a `User-agent` after rules starts a new one. `#` comments stripped.
    pub fn parse(body: &str) -> Self {
        let mut groups: Vec<RuleGroup> = Vec::new();
        for line in body.lines() {
            let raw = line.split('#').next().unwrap_or("").trim();
            if raw.is_empty() {
                continue;
            }
            let Some((key, value)) = raw.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().to_string();
            match key.as_str() {
                "user-agent" => {
                    let start_new = match groups.last() {
                        Some(g) => !g.rules.is_empty(),
                        None => true,
                    };
                    if start_new {
                        groups.push(RuleGroup::default());
                    }
                    if let Some(g) = groups.last_mut() {
                        g.agents.push(value.to_ascii_lowercase());
                    }
                }
                "allow" | "disallow" => {
                    if let Some(g) = groups.last_mut() {
                        let kind = if key == "allow" {
                            RuleKind::Allow
                        } else {
                            RuleKind::Disallow
                        };
                        g.rules.push(Rule { kind, path: value });
                    }
                }
                "crawl-delay" => {
                    if let Some(g) = groups.last_mut() {
                        if let Ok(delay) = value.parse::<f64>() {
                            if delay.is_finite() {
                                g.crawl_delay = Some(delay);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Self { groups }
    }

    fn select_group(&self, agent: &str) -> Option<&RuleGroup> {
        let agent = agent.trim().to_ascii_lowercase();
        self.groups
            .iter()
            .find(|g| g.agents.iter().any(|a| a == &agent))
            .or_else(|| self.groups.iter().find(|g| g.agents.iter().any(|a| a == "*")))
    }
}

/// Longest matching prefix rule for `pathname`, or `None`.
fn longest_match<'a>(pathname: &str, rules: &'a [Rule], kind: RuleKind) -> Option<&'a Rule> {
    rules
        .iter()
        .filter(|r| r.kind == kind && !r.path.is_empty() && pathname.starts_with(&r.path))
        .max_by_key(|r| r.path.len())
}

/// Allow/deny decision for a URL. Select the group matching `agent`
/// exactly, else the wildcard group, else allow. Within a group the
/// longest matching prefix wins; on a tie, Allow wins; no match allows.
pub fn is_allowed(rules: Option<&RobotsRules>, url: &str, agent: &str) -> bool {
    let Some(rules) = rules else { return true };
    let pathname = match url::Url::parse(url) {
        Ok(u) => u.path().to_string(),
        Err(_) => return true,
    };
    let Some(group) = rules.select_group(agent) else {
        return true;
    };
    let allow = longest_match(&pathname, &group.rules, RuleKind::Allow);
    let disallow = longest_match(&pathname, &group.rules, RuleKind::Disallow);
    match (allow, disallow) {
        (None, None) => true,
        (Some(a), Some(d)) => a.path.len() >= d.path.len(),
        (Some(_), None) => true,
        (None, Some(_)) => false,
    }
}

/// `Crawl-delay` in seconds for the agent's group, if present.
pub fn crawl_delay(rules: Option<&RobotsRules>, agent: &str) -> Option<f64> {
    rules?.select_group(agent)?.crawl_delay
}

/// Per-origin robots cache plus the fetch plumbing to fill it.
pub struct RobotsGate {
    fetcher: PoliteFetcher,
    agent: String,
    cache: Mutex<HashMap<String, Option<Arc<RobotsRules>>>>,
}

impl RobotsGate {
    pub fn new(fetcher: PoliteFetcher) -> Self {
        let agent = fetcher.user_agent().to_string();
        Self {
            fetcher,
            agent,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Cached rules for an origin. `None` means "no usable robots.txt":
    /// missing, unreachable, or non-2xx all fail open.
    pub async fn rules(&self, origin: &str) -> Option<Arc<RobotsRules>> {
        if origin.is_empty() {
            return None;
        }
        if let Some(cached) = self.cache.lock().expect("robots cache poisoned").get(origin) {
            return cached.clone();
        }
        let opts = FetchOptions {
            timeout_ms: 10_000,
            retry: RetryPolicy {
                retries: 1,
                ..RetryPolicy::default()
            },
            ..FetchOptions::default()
        };
        let fetched = self
            .fetcher
            .fetch_text(&format!("{origin}/robots.txt"), &opts)
            .await;
        let parsed = match fetched {
            Ok(resp) if !resp.not_modified => Some(Arc::new(RobotsRules::parse(&resp.body))),
            _ => None,
        };
        self.cache
            .lock()
            .expect("robots cache poisoned")
            .insert(origin.to_string(), parsed.clone());
        parsed
    }

    /// Convenience gate for a full URL with this gate's own agent.
    pub async fn allows(&self, url: &str) -> bool {
        let Some(origin) = text::origin_of(url) else {
            return true;
        };
        let rules = self.rules(&origin).await;
        is_allowed(rules.as_deref(), url, &self.agent)
    }

    /// Crawl delay for a URL's origin, in seconds.
    pub async fn delay_for(&self, url: &str) -> Option<f64> {
        let origin = text::origin_of(url)?;
        let rules = self.rules(&origin).await?;
        crawl_delay(Some(&rules), &self.agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOTS: &str = "\
# example
User-agent: *
Disallow: /private/
Allow: /private/press/
Crawl-delay: 2

User-agent: harvester
Disallow: /internal/
";

    #[test]
    fn wildcard_group_longest_prefix() {
        let rules = RobotsRules::parse(ROBOTS);
        assert!(!is_allowed(
            Some(&rules),
            "https://example.com/private/a",
            "other"
        ));
        // Allow has the longer prefix.
        assert!(is_allowed(
            Some(&rules),
            "https://example.com/private/press/x",
            "other"
        ));
        assert!(is_allowed(Some(&rules), "https://example.com/public", "other"));
    }

    #[test]
    fn exact_agent_group_preferred() {
        let rules = RobotsRules::parse(ROBOTS);
        assert!(!is_allowed(
            Some(&rules),
            "https://example.com/internal/x",
            "harvester"
        ));
        // The harvester group has no rule for /private/, so it is allowed.
        assert!(is_allowed(
            Some(&rules),
            "https://example.com/private/a",
            "harvester"
        ));
    }

    #[test]
    fn tie_goes_to_allow() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /a/\nAllow: /a/\n");
        assert!(is_allowed(Some(&rules), "https://example.com/a/x", "*"));
    }

    #[test]
    fn missing_rules_allow_everything() {
        assert!(is_allowed(None, "https://example.com/anything", "*"));
    }

    #[test]
    fn crawl_delay_parsed_per_group() {
        let rules = RobotsRules::parse(ROBOTS);
        assert_eq!(crawl_delay(Some(&rules), "other"), Some(2.0));
        assert_eq!(crawl_delay(Some(&rules), "harvester"), None);
    }
}
