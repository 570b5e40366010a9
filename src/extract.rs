// src/extract.rs
//! # Tagging extractor
//! Deterministic keyword/regex passes that pull structured hints out of
//! raw text: tickers, organizations, commodities, regions, event types,
//! and scored signal tags. Heuristic and explainable on purpose; the same
//! input always yields the same output.

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::types::Entities;

/// Uppercase tokens that look like tickers but never are.
const TICKER_STOPWORDS: &[&str] = &[
    "USD", "US", "EU", "UK", "UN", "AND", "FOR", "THE", "A", "AN", "TO", "OF", "IN", "ON", "AT",
    "CEO", "CFO", "GDP", "CPI", "PPI", "PMI", "FED", "SEC", "EIA", "NOAA", "USGS", "BLS",
];

const COMMODITY_KEYWORDS: &[(&str, &[&str])] = &[
    ("crude_oil", &["crude", "oil", "wti", "brent", "west texas"]),
    ("gasoline", &["gasoline", "gas", "diesel"]),
    ("natural_gas", &["natural gas", "nat gas", "lng", "henry hub"]),
    ("electricity", &["electricity", "power grid", "grid"]),
    ("coal", &["coal"]),
    ("copper", &["copper"]),
    ("gold", &["gold"]),
    ("silver", &["silver"]),
    ("wheat", &["wheat"]),
    ("corn", &["corn"]),
    ("soybeans", &["soy", "soybean", "soybeans"]),
    ("freight", &["freight", "shipping", "container", "tanker", "vessel"]),
];

const REGION_KEYWORDS: &[(&str, &[&str])] = &[
    ("us", &["u.s.", "united states", "america", "us "]),
    ("europe", &["europe", "eurozone", "eu"]),
    ("uk", &["uk", "united kingdom", "britain", "england"]),
    ("china", &["china", "beijing", "shanghai"]),
    ("japan", &["japan", "tokyo"]),
    ("india", &["india", "delhi"]),
    ("middle_east", &["middle east", "gulf", "opec"]),
    ("latin_america", &["latin america", "brazil", "mexico"]),
    ("africa", &["africa", "nigeria", "south africa"]),
    ("global", &["global", "worldwide"]),
];

const EVENT_KEYWORDS: &[(&str, &[&str])] = &[
    ("strike", &["strike", "walkout", "labor action"]),
    ("outage", &["outage", "shutdown", "offline", "curtail"]),
    ("hurricane", &["hurricane", "tropical storm", "cyclone"]),
    ("wildfire", &["wildfire", "fire weather", "burn"]),
    ("drought", &["drought", "dry spell"]),
    ("sanctions", &["sanction", "embargo"]),
    ("cyber", &["cyber", "ransomware", "hack", "breach"]),
    ("layoffs", &["layoff", "job cuts", "redundancy"]),
    ("earnings", &["earnings", "guidance", "results", "profit"]),
    ("shipping", &["port", "shipping", "container", "canal", "freight", "logistics"]),
    ("inventory", &["inventory", "stockpile", "storage"]),
    ("regulatory", &["regulatory", "rule", "compliance", "policy"]),
    ("weather", &["storm", "tornado", "flood", "blizzard", "heat", "snow", "severe weather"]),
];

/// Signal rules in priority/declaration order; ties in hit count keep
/// this order, so output is deterministic.
const SIGNAL_RULES: &[(&str, &[&str])] = &[
    (
        "energy_supply",
        &["opec", "production", "refinery", "output", "supply", "inventory", "storage", "rig count", "export", "import"],
    ),
    (
        "shipping_disruption",
        &["port", "shipping", "container", "canal", "logistics", "freight", "surcharge", "schedule"],
    ),
    (
        "extreme_weather",
        &["tornado", "storm", "hurricane", "flood", "blizzard", "heat", "severe", "warning", "watch"],
    ),
    ("drought_risk", &["drought", "dry", "low rainfall"]),
    ("wildfire_risk", &["wildfire", "fire weather", "smoke"]),
    (
        "regulatory_risk",
        &["regulatory", "rule", "ban", "sanction", "policy", "compliance"],
    ),
    ("earnings", &["earnings", "guidance", "results"]),
    ("layoffs", &["layoff", "job cuts", "redundancy"]),
    ("cyber_incident", &["cyber", "ransomware", "hack", "breach"]),
    ("energy_inventory", &["storage", "inventory", "stockpile", "build", "draw"]),
    ("macro_indicator", &["cpi", "ppi", "gdp", "employment", "jobs report"]),
];

const MAX_TICKERS: usize = 12;
const MAX_ORGANIZATIONS: usize = 12;
const MAX_COMMODITIES: usize = 10;
const MAX_REGIONS: usize = 8;
const MAX_EVENT_TYPES: usize = 10;
const MAX_SIGNAL_TAGS: usize = 6;

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex must compile"))
}

fn push_unique(out: &mut Vec<String>, value: String, cap: usize) {
    if out.len() < cap && !value.is_empty() && !out.contains(&value) {
        out.push(value);
    }
}

/// Dollar-prefixed and exchange-qualified symbols, then a loose uppercase
/// pass behind the stopword filter.
pub fn extract_tickers(text: &str) -> Vec<String> {
    static RE_DOLLAR: OnceCell<Regex> = OnceCell::new();
    static RE_EXCHANGE: OnceCell<Regex> = OnceCell::new();
    static RE_LOOSE: OnceCell<Regex> = OnceCell::new();

    let mut out = Vec::new();
    for m in re(&RE_DOLLAR, r"\$[A-Z]{1,5}\b").find_iter(text) {
        push_unique(&mut out, m.as_str().trim_start_matches('$').to_string(), MAX_TICKERS);
    }
    for c in re(
        &RE_EXCHANGE,
        r"\b(?:NYSE|NASDAQ|NYSEARCA|AMEX)\s*:?\s*([A-Z]{1,5})\b",
    )
    .captures_iter(text)
    {
        push_unique(&mut out, c[1].to_string(), MAX_TICKERS);
    }
    for m in re(&RE_LOOSE, r"\b[A-Z]{2,5}\b").find_iter(text) {
        let symbol = m.as_str();
        if TICKER_STOPWORDS.contains(&symbol) {
            continue;
        }
        push_unique(&mut out, symbol.to_string(), MAX_TICKERS);
    }
    out
}

/// Capitalized name runs followed by a legal suffix.
pub fn extract_organizations(text: &str) -> Vec<String> {
    static RE_ORG: OnceCell<Regex> = OnceCell::new();
    let mut out = Vec::new();
    for c in re(
        &RE_ORG,
        r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+){0,3})\s+(Inc|Corp|Co|Ltd|LLC|PLC|GmbH|SA|AG|NV|BV|Holdings|Group)\b",
    )
    .captures_iter(text)
    {
        push_unique(&mut out, format!("{} {}", &c[1], &c[2]), MAX_ORGANIZATIONS);
    }
    out
}

fn keyword_bucket(text_lower: &str, table: &[(&str, &[&str])], cap: usize) -> Vec<String> {
    let mut out = Vec::new();
    for (key, words) in table {
        if words.iter().any(|w| text_lower.contains(w)) {
            push_unique(&mut out, key.to_string(), cap);
        }
    }
    out
}

pub fn extract_commodities(text: &str) -> Vec<String> {
    keyword_bucket(&text.to_lowercase(), COMMODITY_KEYWORDS, MAX_COMMODITIES)
}

pub fn extract_regions(text: &str) -> Vec<String> {
    keyword_bucket(&text.to_lowercase(), REGION_KEYWORDS, MAX_REGIONS)
}

pub fn extract_event_types(text: &str) -> Vec<String> {
    keyword_bucket(&text.to_lowercase(), EVENT_KEYWORDS, MAX_EVENT_TYPES)
}

/// All entity buckets in one pass.
pub fn extract_entities(text: &str) -> Entities {
    Entities {
        tickers: extract_tickers(text),
        organizations: extract_organizations(text),
        commodities: extract_commodities(text),
        regions: extract_regions(text),
        event_types: extract_event_types(text),
    }
}

/// Score each signal rule by keyword hits and keep the top tags.
/// Stable sort keeps declaration order on ties.
pub fn derive_signal_tags(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut scored: Vec<(&str, usize)> = Vec::new();
    for (tag, words) in SIGNAL_RULES {
        let score = words.iter().filter(|w| lower.contains(*w)).count();
        if score > 0 {
            scored.push((tag, score));
        }
    }
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
        .into_iter()
        .take(MAX_SIGNAL_TAGS)
        .map(|(tag, _)| tag.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tickers_from_all_three_passes() {
        let text = "Shares of $ACME and NYSE: BETA rallied while XOM slid. The CEO shrugged.";
        let tickers = extract_tickers(text);
        assert!(tickers.contains(&"ACME".to_string()));
        assert!(tickers.contains(&"BETA".to_string()));
        assert!(tickers.contains(&"XOM".to_string()));
        assert!(!tickers.contains(&"CEO".to_string()));
    }

    #[test]
    fn organizations_need_a_legal_suffix() {
        let text = "Acme Widget Corp and Northern Lights Holdings expanded; the committee did not.";
        let orgs = extract_organizations(text);
        assert_eq!(
            orgs,
            vec!["Acme Widget Corp".to_string(), "Northern Lights Holdings".to_string()]
        );
    }

    #[test]
    fn buckets_match_keywords_case_insensitively() {
        let text = "Brent CRUDE climbed after OPEC trimmed supply to Europe.";
        assert!(extract_commodities(text).contains(&"crude_oil".to_string()));
        assert!(extract_regions(text).contains(&"middle_east".to_string()));
        assert!(extract_regions(text).contains(&"europe".to_string()));
    }

    #[test]
    fn signal_tags_ranked_by_hits_with_stable_ties() {
        let text = "Port and container logistics strained; refinery output and supply steady.";
        let tags = derive_signal_tags(text);
        // shipping_disruption hits 3 keywords, energy_supply 3; declaration
        // order puts energy_supply first on the tie.
        assert_eq!(tags[0], "energy_supply");
        assert!(tags.contains(&"shipping_disruption".to_string()));
    }

    #[test]
    fn same_input_same_output() {
        let text = "Hurricane warning issued; ports closed, freight rerouted.";
        assert_eq!(derive_signal_tags(text), derive_signal_tags(text));
        assert_eq!(extract_entities(text), extract_entities(text));
    }
}
