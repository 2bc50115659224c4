// tests/job_cleanup.rs
use chrono::{Duration, Utc};
use std::sync::Arc;

use review_aggregator::sources::collector::CollectorSet;
use review_aggregator::sources::describe::NoDescriber;
use review_aggregator::{JobStatus, Orchestrator, SourceLocators};

fn orchestrator() -> Orchestrator {
    Orchestrator::new(CollectorSet::new(), Arc::new(NoDescriber), None)
}

#[tokio::test]
async fn zero_max_age_removes_terminal_jobs_but_keeps_running_ones() {
    let orch = orchestrator();
    let done = orch
        .create_job("Acme", None, SourceLocators::default())
        .unwrap();
    orch.spawn_pipeline(done).await.unwrap();
    let running = orch
        .create_job("Globex", None, SourceLocators::default())
        .unwrap();

    // a moment later than every recorded timestamp
    let later = Utc::now() + Duration::seconds(1);
    let report = orch.cleanup_at(later, Duration::zero());

    assert_eq!(report.removed, 1);
    assert_eq!(report.remaining, 1);
    assert!(orch.get_status(&done).is_err());
    assert_eq!(orch.get_status(&running).unwrap().status, JobStatus::Running);
}

#[tokio::test]
async fn running_jobs_survive_regardless_of_age() {
    let orch = orchestrator();
    let running = orch
        .create_job("Globex", None, SourceLocators::default())
        .unwrap();

    let far_future = Utc::now() + Duration::days(365);
    let report = orch.cleanup_at(far_future, Duration::zero());
    assert_eq!(report.removed, 0);
    assert!(orch.get_status(&running).is_ok());
}

#[tokio::test]
async fn young_terminal_jobs_are_kept() {
    let orch = orchestrator();
    let done = orch
        .create_job("Acme", None, SourceLocators::default())
        .unwrap();
    orch.spawn_pipeline(done).await.unwrap();

    let report = orch.cleanup(Duration::hours(24));
    assert_eq!(report.removed, 0);
    assert_eq!(report.remaining, 1);

    let in_two_days = Utc::now() + Duration::hours(48);
    assert_eq!(orch.cleanup_at(in_two_days, Duration::hours(24)).removed, 1);
    assert!(orch.list_jobs().is_empty());
}
