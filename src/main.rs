//! Review aggregator: binary entrypoint.
//! Boots the Axum HTTP server with the scrape orchestrator, periodic cleanup
//! and the Prometheus `/metrics` route.

use review_aggregator::{telemetry::Metrics, AggregatorConfig};
use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    review_aggregator::init_tracing();

    let cfg = AggregatorConfig::load_default()?;

    // Recorder first, so series touched while building the app are captured.
    let metrics = Metrics::init()
        .map_err(|e| tracing::warn!(error = ?e, "metrics recorder not installed; /metrics disabled"))
        .ok();

    let mut router = review_aggregator::app(&cfg)?;
    if let Some(m) = metrics {
        router = router.merge(m.router());
    }

    Ok(router.into())
}
