// src/sources/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The six origins a finding can come from, in pipeline stage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Maps,
    Aggregator,
    Forum,
    Video,
    ShortVideo,
    Web,
}

impl Source {
    /// Stage order A..F.
    pub const ALL: [Source; 6] = [
        Source::Maps,
        Source::Aggregator,
        Source::Forum,
        Source::Video,
        Source::ShortVideo,
        Source::Web,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Maps => "maps",
            Source::Aggregator => "aggregator",
            Source::Forum => "forum",
            Source::Video => "video",
            Source::ShortVideo => "short_video",
            Source::Web => "web",
        }
    }

    /// Human-facing platform label used in logs.
    pub fn label(self) -> &'static str {
        match self {
            Source::Maps => "Google",
            Source::Aggregator => "Trustpilot",
            Source::Forum => "Reddit",
            Source::Video => "YouTube",
            Source::ShortVideo => "TikTok",
            Source::Web => "Internet",
        }
    }

    pub fn parse(s: &str) -> Option<Source> {
        Source::ALL
            .into_iter()
            .find(|src| src.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// Name/url context a finding was collected for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessReference {
    pub business_name: String,
    #[serde(default)]
    pub business_url: Option<String>,
}

/// One normalized unit of sentiment evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub source: Source,
    #[serde(default)]
    pub external_id: String,
    /// Raw source URL; normalized only for dedup.
    #[serde(default)]
    pub canonical_url: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub text_excerpt: String,
    #[serde(default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub business_reference: BusinessReference,
}

impl Finding {
    /// Bare finding for `source` with the given URL; other fields empty.
    pub fn new(source: Source, canonical_url: impl Into<String>) -> Self {
        Self {
            source,
            external_id: String::new(),
            canonical_url: canonical_url.into(),
            author: String::new(),
            rating: None,
            sentiment: None,
            text_excerpt: String::new(),
            captured_at: Utc::now(),
            business_reference: BusinessReference::default(),
        }
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = id.into();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_excerpt = text.into();
        self
    }

    pub fn with_rating(mut self, rating: u8) -> Self {
        self.rating = Some(rating);
        self
    }
}

/// Per-source locators supplied at job creation. Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocators {
    #[serde(default, alias = "google_maps_url")]
    pub maps_url: Option<String>,
    #[serde(default, alias = "trustpilot_url")]
    pub aggregator_url: Option<String>,
}

/// What every collector receives for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusinessContext {
    pub business_name: String,
    pub business_url: Option<String>,
    /// Locator specific to the stage being run (maps/aggregator URL), if any.
    pub locator: Option<String>,
    /// Description derived once per job; set for every stage after it is known.
    pub description: Option<String>,
}

#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(&self, ctx: &BusinessContext) -> Result<Vec<Finding>>;
    fn source(&self) -> Source;
}

#[async_trait::async_trait]
pub trait DescriptionExtractor: Send + Sync {
    async fn describe(&self, business_url: &str, business_name: &str) -> Result<String>;
}
