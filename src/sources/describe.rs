// src/sources/describe.rs
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DescribeConfig;
use crate::sources::types::DescriptionExtractor;

pub type DynDescriber = Arc<dyn DescriptionExtractor>;

/// Description used when there is no business URL or extraction fails.
pub fn fallback_description(business_name: &str) -> String {
    format!("{business_name} - Business information")
}

/// Ask `describer` for a description; any failure or blank answer yields the fallback.
pub async fn describe_or_fallback(
    describer: &dyn DescriptionExtractor,
    business_url: Option<&str>,
    business_name: &str,
) -> String {
    let Some(url) = business_url else {
        tracing::info!(target: "sources", "no business_url; using default description");
        return fallback_description(business_name);
    };
    match describer.describe(url, business_name).await {
        Ok(d) if !d.trim().is_empty() => d.trim().to_string(),
        Ok(_) => {
            tracing::warn!(target: "sources", url, "empty business description; using fallback");
            fallback_description(business_name)
        }
        Err(e) => {
            tracing::warn!(target: "sources", error = ?e, url, "description extraction failed; using fallback");
            fallback_description(business_name)
        }
    }
}

#[derive(Debug, Deserialize)]
struct DescribeResp {
    description: String,
}

/// Calls a description service: `POST {endpoint}` with `{business_url, business_name}`.
pub struct HttpDescriber {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpDescriber {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .context("building describe http client")?,
        })
    }
}

#[async_trait]
impl DescriptionExtractor for HttpDescriber {
    async fn describe(&self, business_url: &str, business_name: &str) -> Result<String> {
        let resp: DescribeResp = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "business_url": business_url,
                "business_name": business_name,
            }))
            .send()
            .await
            .context("describe post")?
            .error_for_status()
            .context("describe non-2xx")?
            .json()
            .await
            .context("describe json")?;
        Ok(resp.description)
    }
}

/// Used when no description service is configured; always defers to the fallback.
pub struct NoDescriber;

#[async_trait]
impl DescriptionExtractor for NoDescriber {
    async fn describe(&self, _business_url: &str, _business_name: &str) -> Result<String> {
        Err(anyhow!("no description service configured"))
    }
}

pub fn describer_from_config(cfg: &DescribeConfig) -> Result<DynDescriber> {
    match cfg.endpoint.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(url) => Ok(Arc::new(HttpDescriber::new(
            url,
            Duration::from_secs(cfg.timeout_secs.max(1)),
        )?)),
        None => Ok(Arc::new(NoDescriber)),
    }
}
