// src/api.rs
//! HTTP surface: thin handlers mapping 1:1 onto orchestrator operations.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::config::aggregator::hours_to_duration;
use crate::error::AggregatorError;
use crate::job::{JobId, JobResults, JobStatusView};
use crate::orchestrator::Orchestrator;
use crate::sources::SourceLocators;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// Used by `/cleanup` when the body carries no `max_age_hours`.
    pub default_max_age_hours: f64,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            default_max_age_hours: 24.0,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/scrape", post(scrape))
        .route("/status/{job_id}", get(status))
        .route("/results/{job_id}", get(results))
        .route("/jobs", get(jobs))
        .route("/cleanup", post(cleanup))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// JSON error body with a status code.
#[derive(Debug)]
pub struct ApiError(StatusCode, Value);

impl ApiError {
    fn job_not_found() -> Self {
        Self(StatusCode::NOT_FOUND, json!({ "error": "Job not found" }))
    }
}

impl From<AggregatorError> for ApiError {
    fn from(e: AggregatorError) -> Self {
        let msg = e.to_string();
        match e {
            AggregatorError::MissingBusinessName => {
                Self(StatusCode::BAD_REQUEST, json!({ "error": msg }))
            }
            AggregatorError::JobNotFound(_) => Self::job_not_found(),
            AggregatorError::NotCompleted { job_id, status } => Self(
                StatusCode::BAD_REQUEST,
                json!({ "error": msg, "job_id": job_id, "status": status, "final": false }),
            ),
            AggregatorError::AlreadyRunning { job_id, .. } => Self(
                StatusCode::CONFLICT,
                json!({ "error": msg, "job_id": job_id, "status": "running" }),
            ),
            AggregatorError::Driver(_) => {
                Self(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    JobId::parse_str(raw.trim()).map_err(|_| ApiError::job_not_found())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active_jobs": state.orchestrator.active_jobs(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct ScrapeReq {
    #[serde(default)]
    business_name: Option<String>,
    #[serde(default)]
    business_url: Option<String>,
    #[serde(default)]
    source_locators: Option<SourceLocators>,
    #[serde(default, alias = "maps_url")]
    google_maps_url: Option<String>,
    #[serde(default, alias = "aggregator_url")]
    trustpilot_url: Option<String>,
}

impl ScrapeReq {
    /// Nested `source_locators` win over the flat legacy keys.
    fn locators(&mut self) -> SourceLocators {
        let nested = self.source_locators.take().unwrap_or_default();
        SourceLocators {
            maps_url: nested.maps_url.or_else(|| self.google_maps_url.take()),
            aggregator_url: nested.aggregator_url.or_else(|| self.trustpilot_url.take()),
        }
    }
}

async fn scrape(
    State(state): State<AppState>,
    Json(mut body): Json<ScrapeReq>,
) -> Result<Json<Value>, ApiError> {
    let locators = body.locators();
    let name = body.business_name.unwrap_or_default();
    let job_id = state
        .orchestrator
        .start_job(&name, body.business_url, locators)?;
    let name = name.trim();
    tracing::info!(target: "api", %job_id, business = name, "scrape started");
    Ok(Json(json!({
        "job_id": job_id,
        "status": "started",
        "message": format!("Scraping started for {name}"),
        "business_name": name,
    })))
}

async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusView>, ApiError> {
    let id = parse_job_id(&job_id)?;
    Ok(Json(state.orchestrator.get_status(&id)?))
}

async fn results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResults>, ApiError> {
    let id = parse_job_id(&job_id)?;
    Ok(Json(state.orchestrator.get_results(&id)?))
}

async fn jobs(State(state): State<AppState>) -> Json<Value> {
    let jobs = state.orchestrator.list_jobs();
    Json(json!({ "total_jobs": jobs.len(), "jobs": jobs }))
}

#[derive(Debug, Default, Deserialize)]
struct CleanupReq {
    #[serde(default)]
    max_age_hours: Option<f64>,
}

async fn cleanup(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let req: CleanupReq = if body.iter().all(u8::is_ascii_whitespace) {
        CleanupReq::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError(
                StatusCode::BAD_REQUEST,
                json!({ "error": format!("Failed to cleanup jobs: {e}") }),
            )
        })?
    };
    let hours = req
        .max_age_hours
        .filter(|h| h.is_finite())
        .unwrap_or(state.default_max_age_hours);
    let report = state.orchestrator.cleanup(hours_to_duration(hours));
    Ok(Json(json!({
        "message": format!("Cleaned up {} old jobs", report.removed),
        "removed": report.removed,
        "remaining_jobs": report.remaining,
    })))
}
