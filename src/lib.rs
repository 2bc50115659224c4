// src/lib.rs
// Public library surface for the server binary and integration tests.

pub mod api;
pub mod config;
pub mod dedup;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod sink;
pub mod sources;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::AggregatorConfig;
pub use crate::dedup::{normalize_url, DedupIndex};
pub use crate::error::AggregatorError;
pub use crate::job::{JobId, JobStatus};
pub use crate::orchestrator::Orchestrator;
pub use crate::sources::{Finding, Source, SourceLocators};

use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the tracing subscriber. `LOG_FORMAT=json` switches to JSON lines.
/// A subscriber installed earlier (e.g. by the hosting runtime) is left alone.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("review_aggregator=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Build the orchestrator and router from config. Starts the periodic cleanup
/// task when `cleanup.interval_secs` is set, so call this inside a tokio runtime.
pub fn app(cfg: &AggregatorConfig) -> anyhow::Result<axum::Router> {
    let orch = Orchestrator::from_config(cfg)?;

    if let Some(secs) = cfg.cleanup.interval_secs {
        info!(
            interval_secs = secs,
            max_age_hours = cfg.cleanup.default_max_age_hours,
            "periodic job cleanup enabled"
        );
        orchestrator::spawn_cleanup_task(
            orch.clone(),
            Duration::from_secs(secs.max(1)),
            cfg.default_max_age(),
        );
    }

    let state = AppState {
        orchestrator: orch,
        default_max_age_hours: cfg.cleanup.default_max_age_hours,
    };
    Ok(api::router(state))
}
