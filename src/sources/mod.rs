// src/sources/mod.rs
//! Source adapters: one per `SourceKind`, resolved through a registry
//! built at startup. Each adapter turns a configured source into raw
//! items; everything downstream (dedup, tagging, persistence) is shared.

pub mod alerts;
pub mod feed;
pub mod hazard;
pub mod html_page;
pub mod site;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Defaults;
use crate::fetch::PoliteFetcher;
use crate::robots::RobotsGate;
use crate::scheduler::DomainScheduler;
use crate::types::{RawItem, Source, SourceKind};

/// Shared fetch plumbing handed to adapters.
pub struct FetchContext<'a> {
    pub fetcher: &'a PoliteFetcher,
    pub robots: &'a RobotsGate,
    pub scheduler: &'a DomainScheduler,
    pub defaults: &'a Defaults,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;
    async fn fetch_items(&self, source: &Source, ctx: &FetchContext<'_>) -> Result<Vec<RawItem>>;
}

/// Closed registration map from kind to adapter.
pub struct AdapterRegistry {
    adapters: HashMap<SourceKind, Box<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// All built-in adapters.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(feed::FeedAdapter));
        registry.register(Box::new(html_page::HtmlPageAdapter));
        registry.register(Box::new(alerts::StructuredAlertsAdapter));
        registry.register(Box::new(hazard::HazardApiAdapter));
        registry.register(Box::new(site::SiteCrawlAdapter));
        registry
    }

    /// Last registration for a kind wins, so tests can shadow builtins.
    pub fn register(&mut self, adapter: Box<dyn SourceAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: SourceKind) -> Option<&dyn SourceAdapter> {
        self.adapters.get(&kind).map(|adapter| &**adapter)
    }
}
