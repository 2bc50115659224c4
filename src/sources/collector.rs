// src/sources/collector.rs
//! Collector shims: one adapter per source, either backed by an HTTP collector
//! service or disabled when no endpoint is configured.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::CollectorsConfig;
use crate::sources::types::{
    BusinessContext, BusinessReference, Finding, Sentiment, Source, SourceAdapter,
};

/// Wire shape returned by collector services. Accepts the legacy review keys too.
#[derive(Debug, Default, Deserialize)]
struct WireFinding {
    #[serde(default, alias = "id_review")]
    external_id: Option<String>,
    #[serde(default, alias = "review_url", alias = "url_user", alias = "url")]
    canonical_url: Option<String>,
    #[serde(default, alias = "username")]
    author: Option<String>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    sentiment: Option<Sentiment>,
    #[serde(default, alias = "caption", alias = "text")]
    text_excerpt: Option<String>,
    #[serde(default)]
    captured_at: Option<DateTime<Utc>>,
}

impl WireFinding {
    fn into_finding(self, source: Source) -> Finding {
        Finding {
            source,
            external_id: self.external_id.unwrap_or_default(),
            canonical_url: self.canonical_url.unwrap_or_default(),
            author: self.author.unwrap_or_default(),
            rating: self
                .rating
                .filter(|r| r.is_finite())
                .map(|r| r.round().clamp(0.0, 255.0) as u8),
            sentiment: self.sentiment,
            text_excerpt: self.text_excerpt.unwrap_or_default(),
            captured_at: self.captured_at.unwrap_or_else(Utc::now),
            business_reference: BusinessReference::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CollectRequest<'a> {
    source: Source,
    #[serde(flatten)]
    context: &'a BusinessContext,
    max_results: u32,
}

/// Posts the business context to a collector endpoint and decodes a JSON array of findings.
pub struct HttpCollector {
    source: Source,
    url: String,
    max_results: u32,
    client: reqwest::Client,
}

impl HttpCollector {
    pub fn new(source: Source, url: impl Into<String>, cfg: &CollectorsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .build()
            .context("building collector http client")?;
        Ok(Self {
            source,
            url: url.into(),
            max_results: cfg.max_results,
            client,
        })
    }

    fn decode(&self, body: &str) -> Result<Vec<Finding>> {
        let raw: Vec<WireFinding> = serde_json::from_str(body)
            .with_context(|| format!("decoding {} collector response", self.source))?;
        Ok(raw.into_iter().map(|w| w.into_finding(self.source)).collect())
    }
}

#[async_trait]
impl SourceAdapter for HttpCollector {
    async fn fetch(&self, ctx: &BusinessContext) -> Result<Vec<Finding>> {
        let t0 = std::time::Instant::now();
        let req = CollectRequest {
            source: self.source,
            context: ctx,
            max_results: self.max_results,
        };
        let body = self
            .client
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .with_context(|| format!("{} collector post", self.source))?
            .error_for_status()
            .with_context(|| format!("{} collector non-2xx", self.source))?
            .text()
            .await
            .with_context(|| format!("{} collector body", self.source))?;
        let out = self.decode(&body)?;

        histogram!("collector_fetch_ms", "source" => self.source.as_str())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("collector_findings_total", "source" => self.source.as_str())
            .increment(out.len() as u64);
        Ok(out)
    }

    fn source(&self) -> Source {
        self.source
    }
}

/// Stand-in for a source with no collector configured.
pub struct DisabledCollector(pub Source);

#[async_trait]
impl SourceAdapter for DisabledCollector {
    async fn fetch(&self, _ctx: &BusinessContext) -> Result<Vec<Finding>> {
        tracing::debug!(target: "sources", source = %self.0, "collector disabled (no endpoint)");
        Ok(Vec::new())
    }

    fn source(&self) -> Source {
        self.0
    }
}

pub type DynAdapter = Arc<dyn SourceAdapter>;

/// One adapter per source. Missing entries behave like [`DisabledCollector`].
#[derive(Clone, Default)]
pub struct CollectorSet {
    adapters: BTreeMap<Source, DynAdapter>,
}

impl CollectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, adapter: DynAdapter) -> Self {
        self.adapters.insert(adapter.source(), adapter);
        self
    }

    pub fn get(&self, source: Source) -> DynAdapter {
        self.adapters
            .get(&source)
            .cloned()
            .unwrap_or_else(|| Arc::new(DisabledCollector(source)) as DynAdapter)
    }

    /// Build HTTP collectors for every source with a configured endpoint.
    pub fn from_config(cfg: &CollectorsConfig) -> Result<Self> {
        let mut set = Self::new();
        for source in Source::ALL {
            match cfg.endpoint_for(source) {
                Some(url) => {
                    tracing::info!(target: "sources", %source, url, "http collector configured");
                    set = set.with(Arc::new(HttpCollector::new(source, url, cfg)?));
                }
                None => {
                    tracing::info!(target: "sources", %source, "no collector endpoint; stage will return nothing");
                }
            }
        }
        Ok(set)
    }
}
