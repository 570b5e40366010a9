// tests/providers_feed.rs
// Fixture-driven adapter parsing: no HTTP involved.

use signal_harvester::sources::alerts::parse_alerts;
use signal_harvester::sources::feed::parse_feed;
use signal_harvester::types::{Source, SourceKind};

fn feed_source() -> Source {
    Source {
        id: "energy_wire".into(),
        kind: SourceKind::Feed,
        url: "https://energywire.example/rss".into(),
        category: "energy_inventory".into(),
        tags: vec!["energy".into()],
        reliability: 0.8,
        enabled: true,
        allow_html: false,
        max_items: 40,
        language: "en".into(),
    }
}

#[test]
fn feed_items_parse_with_dates_and_urls() {
    let xml = include_str!("fixtures/feed_rss.xml");
    let items = parse_feed(xml, &feed_source(), 40).unwrap();
    assert_eq!(items.len(), 3);

    let first = &items[0];
    assert_eq!(first.source_title, "Energy Wire");
    assert_eq!(
        first.title,
        "Refinery outage curtails gasoline output on the Gulf Coast"
    );
    assert_eq!(
        first.canonical_url,
        "https://energywire.example/articles/refinery-outage"
    );
    assert!(first.summary.contains("two-week restart window"));
    assert!(first.published_at.is_some());
    assert_eq!(first.category, "energy_inventory");

    // Fragment stripped during URL normalization.
    assert_eq!(
        items[1].canonical_url,
        "https://energywire.example/articles/crude-build"
    );

    // Empty title falls back to the feed title; bad date becomes None.
    assert_eq!(items[2].title, "Energy Wire");
    assert!(items[2].published_at.is_none());
}

#[test]
fn feed_item_cap_applies() {
    let xml = include_str!("fixtures/feed_rss.xml");
    let items = parse_feed(xml, &feed_source(), 1).unwrap();
    assert_eq!(items.len(), 1);
}

#[test]
fn malformed_feed_is_an_error() {
    assert!(parse_feed("this is not xml <", &feed_source(), 40).is_err());
}

#[test]
fn alerts_parse_headline_event_and_dates() {
    let source = Source {
        id: "nws".into(),
        kind: SourceKind::StructuredAlerts,
        url: "https://alerts.example/api".into(),
        category: "environmental_hazard".into(),
        tags: vec!["weather".into()],
        reliability: 0.95,
        enabled: true,
        allow_html: false,
        max_items: 40,
        language: "en".into(),
    };
    let items = parse_alerts(include_str!("fixtures/alerts.json"), &source).unwrap();
    assert_eq!(items.len(), 2);

    let warning = &items[0];
    assert_eq!(warning.title, "Hurricane Warning issued for coastal counties");
    assert_eq!(warning.canonical_url, "https://alerts.example/alerts/alert-1");
    assert!(warning.content.contains("Ports are expected to close"));
    assert!(warning.content.contains("Complete preparations"));
    assert!(warning.published_at.is_some());
    assert!(warning.tags.contains(&"hurricane warning".to_string()));

    // No description: summary falls back to the area, date to `effective`,
    // canonical URL to the feature id.
    let watch = &items[1];
    assert_eq!(watch.title, "Flood Watch");
    assert_eq!(watch.summary, "River valley");
    assert_eq!(watch.canonical_url, "https://alerts.example/id/alert-2");
    assert!(watch.published_at.is_some());
}
