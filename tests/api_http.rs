// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value as Json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt as _; // for `oneshot`

use review_aggregator::api::{self, AppState};
use review_aggregator::sources::collector::CollectorSet;
use review_aggregator::sources::describe::NoDescriber;
use review_aggregator::sources::describe::DynDescriber;
use review_aggregator::sources::{
    BusinessContext, DescriptionExtractor, Finding, Source, SourceAdapter,
};
use review_aggregator::Orchestrator;

const BODY_LIMIT: usize = 1024 * 1024;

struct OneReview(Source, &'static str);

#[async_trait]
impl SourceAdapter for OneReview {
    async fn fetch(&self, _ctx: &BusinessContext) -> Result<Vec<Finding>> {
        Ok(vec![Finding::new(self.0, self.1).with_rating(5)])
    }
    fn source(&self) -> Source {
        self.0
    }
}

struct Blocked(Arc<Notify>);

#[async_trait]
impl SourceAdapter for Blocked {
    async fn fetch(&self, _ctx: &BusinessContext) -> Result<Vec<Finding>> {
        self.0.notified().await;
        Ok(Vec::new())
    }
    fn source(&self) -> Source {
        Source::Maps
    }
}

struct Exploding;

#[async_trait]
impl DescriptionExtractor for Exploding {
    async fn describe(&self, _url: &str, _name: &str) -> Result<String> {
        panic!("describer exploded")
    }
}

fn app_with(collectors: CollectorSet) -> Router {
    app_with_describer(collectors, Arc::new(NoDescriber))
}

fn app_with_describer(collectors: CollectorSet, describer: DynDescriber) -> Router {
    let orch = Orchestrator::new(collectors, describer, None);
    api::router(AppState::new(orch))
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Json) {
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let v = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, v)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET")
}

fn post_json(uri: &str, v: Json) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(v.to_string()))
        .expect("build POST")
}

async fn wait_for_status(app: &Router, job_id: &str, want: &str) -> Json {
    for _ in 0..200 {
        let (code, v) = send(app, get(&format!("/status/{job_id}"))).await;
        assert_eq!(code, StatusCode::OK);
        if v["status"] == want {
            return v;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {job_id} never reached {want}");
}

#[tokio::test]
async fn health_reports_active_jobs() {
    let app = app_with(CollectorSet::new());
    let (code, v) = send(&app, get("/health")).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(v["status"], "healthy");
    assert_eq!(v["active_jobs"], 0);
    assert!(v["timestamp"].is_string());
}

#[tokio::test]
async fn scrape_then_poll_then_fetch_results() {
    let app = app_with(
        CollectorSet::new()
            .with(Arc::new(OneReview(Source::Maps, "https://maps.test/r/1")))
            .with(Arc::new(OneReview(Source::Aggregator, "http://www.maps.test/r/1/"))),
    );

    let (code, v) = send(
        &app,
        post_json(
            "/scrape",
            json!({
                "business_name": "Acme",
                "google_maps_url": "https://maps.test/acme",
                "source_locators": { "aggregator_url": "https://reviews.test/acme" }
            }),
        ),
    )
    .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(v["status"], "started");
    assert_eq!(v["business_name"], "Acme");
    let job_id = v["job_id"].as_str().expect("job_id").to_string();

    let st = wait_for_status(&app, &job_id, "completed").await;
    assert_eq!(st["progress"], 100);
    assert_eq!(st["statistics"]["maps"], 1);
    assert_eq!(st["statistics"]["aggregator"], 0);
    assert_eq!(st["statistics"]["total_unique"], 1);
    assert!(st["error"].is_null());

    let (code, res) = send(&app, get(&format!("/results/{job_id}"))).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(res["final"], true);
    assert_eq!(res["total_reviews"], 1);
    assert_eq!(res["all_reviews"][0]["source"], "maps");
    assert_eq!(res["all_reviews"][0]["rating"], 5);
    assert_eq!(res["results"]["maps"].as_array().unwrap().len(), 1);

    let (code, jobs) = send(&app, get("/jobs")).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(jobs["total_jobs"], 1);
    assert_eq!(jobs["jobs"][0]["job_id"], job_id.as_str());
}

#[tokio::test]
async fn missing_business_name_is_rejected() {
    let app = app_with(CollectorSet::new());
    let (code, v) = send(&app, post_json("/scrape", json!({ "business_url": "https://x.test" }))).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert!(v["error"].as_str().unwrap().contains("business_name"));

    let (_, jobs) = send(&app, get("/jobs")).await;
    assert_eq!(jobs["total_jobs"], 0);
}

#[tokio::test]
async fn unknown_or_malformed_job_ids_are_404() {
    let app = app_with(CollectorSet::new());
    let id = uuid::Uuid::new_v4();
    for uri in [
        format!("/status/{id}"),
        format!("/results/{id}"),
        "/status/not-a-uuid".to_string(),
    ] {
        let (code, v) = send(&app, get(&uri)).await;
        assert_eq!(code, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(v["error"], "Job not found");
    }
}

#[tokio::test]
async fn results_before_completion_and_duplicate_start() {
    let gate = Arc::new(Notify::new());
    let app = app_with(CollectorSet::new().with(Arc::new(Blocked(gate.clone()))));

    let body = json!({ "business_name": "Acme", "google_maps_url": "https://maps.test/acme" });
    let (code, v) = send(&app, post_json("/scrape", body.clone())).await;
    assert_eq!(code, StatusCode::OK);
    let job_id = v["job_id"].as_str().unwrap().to_string();

    let (code, v) = send(&app, get(&format!("/results/{job_id}"))).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(v["status"], "running");
    assert_eq!(v["final"], false);
    assert!(v.get("all_reviews").is_none());

    let (code, v) = send(&app, post_json("/scrape", body)).await;
    assert_eq!(code, StatusCode::CONFLICT);
    assert_eq!(v["job_id"], job_id.as_str());

    gate.notify_one();
    wait_for_status(&app, &job_id, "completed").await;
}

#[tokio::test]
async fn cleanup_removes_finished_jobs_only() {
    let gate = Arc::new(Notify::new());
    let app = app_with(CollectorSet::new().with(Arc::new(Blocked(gate.clone()))));

    let (_, done) = send(&app, post_json("/scrape", json!({ "business_name": "Done Co" }))).await;
    let done_id = done["job_id"].as_str().unwrap().to_string();
    wait_for_status(&app, &done_id, "completed").await;

    let (_, busy) = send(
        &app,
        post_json(
            "/scrape",
            json!({ "business_name": "Busy Co", "google_maps_url": "https://maps.test/busy" }),
        ),
    )
    .await;
    let busy_id = busy["job_id"].as_str().unwrap().to_string();

    // default max age keeps the fresh job
    let req = Request::builder()
        .method("POST")
        .uri("/cleanup")
        .body(Body::empty())
        .unwrap();
    let (code, v) = send(&app, req).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(v["removed"], 0);
    assert_eq!(v["remaining_jobs"], 2);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let (code, v) = send(&app, post_json("/cleanup", json!({ "max_age_hours": 0 }))).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(v["removed"], 1);
    assert_eq!(v["remaining_jobs"], 1);

    let (code, _) = send(&app, get(&format!("/status/{done_id}"))).await;
    assert_eq!(code, StatusCode::NOT_FOUND);
    let (code, v) = send(&app, get(&format!("/status/{busy_id}"))).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(v["status"], "running");

    gate.notify_one();
}

#[tokio::test]
async fn failed_job_results_are_final_and_carry_the_error() {
    let app = app_with_describer(
        CollectorSet::new().with(Arc::new(OneReview(Source::Forum, "https://forum.test/t/9"))),
        Arc::new(Exploding),
    );

    let (code, v) = send(
        &app,
        post_json(
            "/scrape",
            json!({ "business_name": "Acme", "business_url": "https://acme.test" }),
        ),
    )
    .await;
    assert_eq!(code, StatusCode::OK);
    let job_id = v["job_id"].as_str().unwrap().to_string();

    let st = wait_for_status(&app, &job_id, "failed").await;
    assert!(st["progress"].as_u64().unwrap() < 100);
    assert!(st["error"].as_str().unwrap().contains("describer exploded"));

    let (code, res) = send(&app, get(&format!("/results/{job_id}"))).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(res["status"], "failed");
    assert_eq!(res["final"], true);
    assert!(res["error"].as_str().unwrap().contains("describer exploded"));
    assert_eq!(res["total_reviews"], 1);
    assert_eq!(res["results"]["forum"].as_array().unwrap().len(), 1);
}
