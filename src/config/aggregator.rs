// src/config/aggregator.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sources::Source;

pub const ENV_CONFIG_PATH: &str = "AGGREGATOR_CONFIG_PATH";
pub const ENV_RESULTS_DIR: &str = "AGGREGATOR_RESULTS_DIR";
pub const ENV_CLEANUP_INTERVAL_SECS: &str = "AGGREGATOR_CLEANUP_INTERVAL_SECS";

fn default_collector_timeout_secs() -> u64 {
    120
}
fn default_max_results() -> u32 {
    100
}
fn default_describe_timeout_secs() -> u64 {
    30
}
fn default_max_age_hours() -> f64 {
    24.0
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default)]
    pub collectors: CollectorsConfig,
    #[serde(default)]
    pub describe: DescribeConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Where each source's collector lives. Keys are source names (`maps`, `forum`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorsConfig {
    #[serde(default = "default_collector_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
}

impl Default for CollectorsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_collector_timeout_secs(),
            max_results: default_max_results(),
            endpoints: BTreeMap::new(),
        }
    }
}

impl CollectorsConfig {
    pub fn endpoint_for(&self, source: Source) -> Option<&str> {
        self.endpoints
            .iter()
            .find(|(k, _)| Source::parse(k) == Some(source))
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DescribeConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_describe_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DescribeConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_describe_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_max_age_hours")]
    pub default_max_age_hours: f64,
    /// Periodic cleanup is off unless set.
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            default_max_age_hours: default_max_age_hours(),
            interval_secs: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub results_dir: Option<PathBuf>,
}

impl AggregatorConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading aggregator config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = parse_config(&content, ext.as_str())?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Resolution order:
    /// 1) $AGGREGATOR_CONFIG_PATH
    /// 2) config/aggregator.toml
    /// 3) config/aggregator.json
    /// 4) built-in defaults
    ///
    /// Env overrides are applied on top in every case.
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else if Path::new("config/aggregator.toml").exists() {
            Self::load_from(Path::new("config/aggregator.toml"))?
        } else if Path::new("config/aggregator.json").exists() {
            Self::load_from(Path::new("config/aggregator.json"))?
        } else {
            Self::default()
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var(ENV_RESULTS_DIR) {
            let dir = dir.trim();
            if !dir.is_empty() {
                self.persistence.results_dir = Some(PathBuf::from(dir));
            }
        }
        if let Some(secs) = std::env::var(ENV_CLEANUP_INTERVAL_SECS)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
        {
            self.cleanup.interval_secs = (secs > 0).then_some(secs);
        }
    }

    fn sanitize(&mut self) {
        if !self.cleanup.default_max_age_hours.is_finite() || self.cleanup.default_max_age_hours < 0.0
        {
            self.cleanup.default_max_age_hours = default_max_age_hours();
        }
        for key in self.collectors.endpoints.keys() {
            if Source::parse(key).is_none() {
                tracing::warn!(target: "config", key = %key, "unknown collector source ignored");
            }
        }
    }

    pub fn default_max_age(&self) -> chrono::Duration {
        hours_to_duration(self.cleanup.default_max_age_hours)
    }
}

/// Upper bound for any configured age (about a century).
const MAX_AGE_HOURS: f64 = 876_000.0;

/// Fractional hours to a chrono duration, clamped to `0..=MAX_AGE_HOURS`.
pub fn hours_to_duration(hours: f64) -> chrono::Duration {
    let hours = if hours.is_finite() { hours } else { 0.0 };
    let ms = (hours.clamp(0.0, MAX_AGE_HOURS) * 3_600_000.0).round();
    chrono::Duration::milliseconds(ms as i64)
}

fn parse_config(s: &str, hint_ext: &str) -> Result<AggregatorConfig> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("parsing aggregator json config");
    }
    match toml::from_str(s) {
        Ok(cfg) => Ok(cfg),
        Err(toml_err) => serde_json::from_str(s)
            .map_err(|_| anyhow!("unsupported aggregator config format: {toml_err}")),
    }
}
