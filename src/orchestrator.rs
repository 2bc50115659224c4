//! # Orchestrator
//! Creates scrape jobs and drives each one through the fixed six-stage pipeline:
//!
//! | stage | source        | runs when                 |
//! |-------|---------------|---------------------------|
//! | A     | maps          | maps locator supplied     |
//! | B     | aggregator    | aggregator locator given  |
//! | C     | forum         | business URL supplied     |
//! | D     | video         | business URL supplied     |
//! | E     | short video   | business URL (+ description) |
//! | F     | web search    | business URL supplied     |
//!
//! Every job runs on its own tokio task. Stages inside one job run strictly in
//! order, so the dedup index has a single writer. A failing (or panicking)
//! collector only empties its own stage; anything that escapes the driver
//! marks the job `failed`.

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AggregatorConfig;
use crate::dedup::DedupIndex;
use crate::error::{AggregatorError, Result};
use crate::job::{Job, JobId, JobRecord, JobResults, JobStatus, JobStatusView, JobStore, JobSummary};
use crate::sink::{DynSink, JsonDirSink};
use crate::sources::collector::CollectorSet;
use crate::sources::describe::{describe_or_fallback, describer_from_config, DynDescriber};
use crate::sources::{non_empty, prepare_finding, BusinessContext, BusinessReference, Source, SourceLocators};

/// Register HELP text for the pipeline series. Must run after the recorder
/// is installed; descriptions sent to the no-op recorder are lost.
pub fn describe_metrics() {
    describe_counter!("scrape_jobs_started_total", "Scrape jobs created.");
    describe_counter!("scrape_jobs_completed_total", "Scrape jobs that completed.");
    describe_counter!("scrape_jobs_failed_total", "Scrape jobs that failed in the driver.");
    describe_counter!(
        "scrape_stage_errors_total",
        "Collector failures absorbed as empty stages."
    );
    describe_counter!(
        "scrape_findings_admitted_total",
        "Findings admitted after dedup."
    );
    describe_counter!(
        "scrape_findings_duplicate_total",
        "Findings rejected as duplicates."
    );
    describe_histogram!("scrape_stage_ms", "Wall time per executed stage in milliseconds.");
    describe_gauge!("scrape_jobs_running", "Jobs currently in running state.");
    describe_counter!("scrape_cleanup_removed_total", "Jobs removed by periodic cleanup.");
}

/// `floor(100 * done / total)`; zero applicable stages count as done.
pub fn progress_pct(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((100 * done) / total).min(100) as u8
}

/// Whether a stage runs or is skipped for a missing locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    pub source: Source,
    pub locator: Option<String>,
    pub applicable: bool,
}

/// Decide, per stage, whether the job has what that stage needs.
pub fn plan_stages(business_url: Option<&str>, locators: &SourceLocators) -> Vec<StagePlan> {
    Source::ALL
        .into_iter()
        .map(|source| {
            let locator = match source {
                Source::Maps => locators.maps_url.clone(),
                Source::Aggregator => locators.aggregator_url.clone(),
                _ => None,
            };
            let applicable = match source {
                Source::Maps | Source::Aggregator => locator.is_some(),
                _ => business_url.is_some(),
            };
            StagePlan {
                source,
                locator,
                applicable,
            }
        })
        .collect()
}

/// What happened in one stage; logged at the end of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageReport {
    pub skipped: bool,
    pub fetched: usize,
    pub admitted: usize,
    pub duplicates: usize,
    pub error: Option<String>,
}

/// Values threaded through the stages of one run.
struct PipelineState {
    business_name: String,
    business_url: Option<String>,
    reference: BusinessReference,
    /// Derived once, right before the first stage that needs it.
    description: Option<String>,
    dedup: DedupIndex,
}

impl PipelineState {
    fn context(&self, plan: &StagePlan) -> BusinessContext {
        BusinessContext {
            business_name: self.business_name.clone(),
            business_url: self.business_url.clone(),
            locator: plan.locator.clone(),
            description: self.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub removed: usize,
    pub remaining: usize,
}

struct Inner {
    store: JobStore,
    collectors: CollectorSet,
    describer: DynDescriber,
    sink: Option<DynSink>,
}

/// Owns the job store and runs pipelines. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(collectors: CollectorSet, describer: DynDescriber, sink: Option<DynSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: JobStore::new(),
                collectors,
                describer,
                sink,
            }),
        }
    }

    /// Wire collectors, description service and optional results dir from config.
    pub fn from_config(cfg: &AggregatorConfig) -> anyhow::Result<Self> {
        let collectors = CollectorSet::from_config(&cfg.collectors)?;
        let describer = describer_from_config(&cfg.describe)?;
        let sink: Option<DynSink> = cfg.persistence.results_dir.as_ref().map(|dir| {
            info!(target: "orchestrator", dir = %dir.display(), "job results write-through enabled");
            Arc::new(JsonDirSink::new(dir.clone())) as DynSink
        });
        Ok(Self::new(collectors, describer, sink))
    }

    /// Register a new running job and return its id. Does not start any work.
    pub fn create_job(
        &self,
        business_name: &str,
        business_url: Option<String>,
        locators: SourceLocators,
    ) -> Result<JobId> {
        let business_name = business_name.trim();
        if business_name.is_empty() {
            return Err(AggregatorError::MissingBusinessName);
        }
        let locators = SourceLocators {
            maps_url: non_empty(locators.maps_url),
            aggregator_url: non_empty(locators.aggregator_url),
        };
        let job = Job::new(
            business_name.to_string(),
            non_empty(business_url),
            locators,
            Utc::now(),
        );

        let skipped: Vec<&str> = plan_stages(job.business_url.as_deref(), &job.source_locators)
            .iter()
            .filter(|p| !p.applicable)
            .map(|p| p.source.label())
            .collect();

        let record = self
            .inner
            .store
            .insert_exclusive(job)
            .map_err(|job_id| AggregatorError::AlreadyRunning {
                business_name: business_name.to_string(),
                job_id,
            })?;

        counter!("scrape_jobs_started_total").increment(1);
        gauge!("scrape_jobs_running").set(self.inner.store.running_count() as f64);
        info!(
            target: "orchestrator",
            job_id = %record.id(),
            business = business_name,
            skipped = ?skipped,
            "job created"
        );
        Ok(record.id())
    }

    /// Create a job and immediately start its pipeline in the background.
    pub fn start_job(
        &self,
        business_name: &str,
        business_url: Option<String>,
        locators: SourceLocators,
    ) -> Result<JobId> {
        let job_id = self.create_job(business_name, business_url, locators)?;
        self.spawn_pipeline(job_id);
        Ok(job_id)
    }

    /// Run the pipeline for `job_id` on its own task. Errors and panics from the
    /// driver are caught here and turned into a `failed` job.
    pub fn spawn_pipeline(&self, job_id: JobId) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let driver = {
                let this = this.clone();
                tokio::spawn(async move { this.run_pipeline(job_id).await })
            };
            let error = match driver.await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(join) if join.is_panic() => panic_message(join.into_panic()),
                Err(join) => join.to_string(),
            };
            warn!(target: "orchestrator", %job_id, %error, "scrape job failed");
            this.fail_job(job_id, error).await;
        })
    }

    /// Drive all six stages for `job_id`, then mark the job completed.
    pub async fn run_pipeline(&self, job_id: JobId) -> Result<()> {
        let record = self.record(&job_id)?;
        let (mut state, plans) = {
            let job = record.read();
            if job.status != JobStatus::Running {
                return Err(AggregatorError::Driver(format!(
                    "job {job_id} is {} and cannot be run",
                    job.status
                )));
            }
            let state = PipelineState {
                business_name: job.business_name.clone(),
                business_url: job.business_url.clone(),
                reference: BusinessReference {
                    business_name: job.business_name.clone(),
                    business_url: job.business_url.clone(),
                },
                description: None,
                dedup: DedupIndex::new(),
            };
            let plans = plan_stages(job.business_url.as_deref(), &job.source_locators);
            (state, plans)
        };

        let total_applicable = plans.iter().filter(|p| p.applicable).count();
        let stage_count = plans.len();
        info!(
            target: "orchestrator",
            %job_id,
            business = %state.business_name,
            applicable = total_applicable,
            "starting scrape pipeline"
        );

        let mut reports = Vec::with_capacity(stage_count);
        for (i, plan) in plans.iter().enumerate() {
            let step = i + 1;
            let report = if plan.applicable {
                info!(target: "orchestrator", %job_id, "Step {step}/{stage_count}: scraping {}", plan.source.label());
                if plan.source == Source::ShortVideo {
                    self.ensure_description(&mut state).await;
                }
                self.run_stage(&record, &mut state, plan).await
            } else {
                info!(target: "orchestrator", %job_id, "Step {step}/{stage_count}: skipping {} (no locator)", plan.source.label());
                StageReport {
                    skipped: true,
                    ..StageReport::default()
                }
            };
            reports.push((plan.source, report));

            record
                .write()
                .advance_progress(progress_pct(step, total_applicable));
        }

        let results = {
            let mut job = record.write();
            if !job.complete(Utc::now()) {
                return Err(AggregatorError::Driver(format!(
                    "job {job_id} left running state mid-pipeline"
                )));
            }
            job.results()
        };

        counter!("scrape_jobs_completed_total").increment(1);
        gauge!("scrape_jobs_running").set(self.inner.store.running_count() as f64);
        info!(
            target: "orchestrator",
            %job_id,
            total_unique = results.statistics.total_unique,
            duplicates = state.dedup.rejected(),
            breakdown = ?results.statistics.per_source,
            "scrape completed"
        );
        debug!(target: "orchestrator", %job_id, stages = ?reports, "stage reports");

        self.write_through(&results).await;
        Ok(())
    }

    async fn ensure_description(&self, state: &mut PipelineState) {
        if state.description.is_some() {
            return;
        }
        let d = describe_or_fallback(
            self.inner.describer.as_ref(),
            state.business_url.as_deref(),
            &state.business_name,
        )
        .await;
        debug!(target: "orchestrator", description = %d, "business description resolved");
        state.description = Some(d);
    }

    async fn run_stage(
        &self,
        record: &JobRecord,
        state: &mut PipelineState,
        plan: &StagePlan,
    ) -> StageReport {
        let source = plan.source;
        let adapter = self.inner.collectors.get(source);
        let ctx = state.context(plan);
        let t0 = std::time::Instant::now();

        // Own task so a panicking collector is contained to its stage.
        let fetched = tokio::spawn(async move { adapter.fetch(&ctx).await }).await;
        histogram!("scrape_stage_ms", "source" => source.as_str())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);

        let findings = match fetched {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return stage_failed(record.id(), source, format!("{e:#}")),
            Err(join) if join.is_panic() => {
                return stage_failed(record.id(), source, panic_message(join.into_panic()))
            }
            Err(join) => return stage_failed(record.id(), source, join.to_string()),
        };

        let mut report = StageReport {
            fetched: findings.len(),
            ..StageReport::default()
        };
        let mut admitted = Vec::with_capacity(findings.len());
        for f in findings {
            let f = prepare_finding(f, source, &state.reference);
            if state.dedup.admit(&f) {
                admitted.push(f);
            } else {
                report.duplicates += 1;
            }
        }

        report.admitted = {
            let mut job = record.write();
            admitted
                .into_iter()
                .fold(0, |n, f| n + usize::from(job.append(f)))
        };

        counter!("scrape_findings_admitted_total", "source" => source.as_str())
            .increment(report.admitted as u64);
        counter!("scrape_findings_duplicate_total", "source" => source.as_str())
            .increment(report.duplicates as u64);
        info!(
            target: "orchestrator",
            job_id = %record.id(),
            %source,
            fetched = report.fetched,
            admitted = report.admitted,
            duplicates = report.duplicates,
            "{}: {} unique findings",
            source.label(),
            report.admitted
        );
        report
    }

    async fn fail_job(&self, job_id: JobId, error: String) {
        let Some(record) = self.inner.store.get(&job_id) else {
            return;
        };
        let results = {
            let mut job = record.write();
            if !job.fail(error, Utc::now()) {
                return;
            }
            job.results()
        };
        counter!("scrape_jobs_failed_total").increment(1);
        gauge!("scrape_jobs_running").set(self.inner.store.running_count() as f64);
        self.write_through(&results).await;
    }

    async fn write_through(&self, results: &JobResults) {
        if let Some(sink) = &self.inner.sink {
            if let Err(e) = sink.store(results).await {
                warn!(target: "orchestrator", job_id = %results.job_id, error = ?e, "storing job results failed");
            }
        }
    }

    fn record(&self, job_id: &JobId) -> Result<Arc<JobRecord>> {
        self.inner
            .store
            .get(job_id)
            .ok_or(AggregatorError::JobNotFound(*job_id))
    }

    pub fn get_status(&self, job_id: &JobId) -> Result<JobStatusView> {
        Ok(self.record(job_id)?.read().status_view())
    }

    /// Full results of a terminal job. A running job yields `NotCompleted`.
    pub fn get_results(&self, job_id: &JobId) -> Result<JobResults> {
        let record = self.record(job_id)?;
        let job = record.read();
        if job.status == JobStatus::Running {
            return Err(AggregatorError::NotCompleted {
                job_id: *job_id,
                status: job.status,
            });
        }
        Ok(job.results())
    }

    pub fn list_jobs(&self) -> Vec<JobSummary> {
        self.inner
            .store
            .records()
            .iter()
            .map(|r| r.read().summary())
            .collect()
    }

    pub fn active_jobs(&self) -> usize {
        self.inner.store.running_count()
    }

    /// Drop terminal jobs whose end (or start) is older than `max_age`.
    pub fn cleanup(&self, max_age: chrono::Duration) -> CleanupReport {
        self.cleanup_at(Utc::now(), max_age)
    }

    /// [`Orchestrator::cleanup`] against an explicit clock.
    pub fn cleanup_at(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> CleanupReport {
        let removed = self
            .inner
            .store
            .remove_where(|job| job.status.is_terminal() && now - job.age_anchor() > max_age);
        let remaining = self.inner.store.len();
        info!(target: "orchestrator", removed, remaining, "cleanup finished");
        CleanupReport { removed, remaining }
    }
}

fn stage_failed(job_id: JobId, source: Source, error: String) -> StageReport {
    warn!(target: "orchestrator", %job_id, %source, %error, "{} scraping failed", source.label());
    counter!("scrape_stage_errors_total", "source" => source.as_str()).increment(1);
    StageReport {
        error: Some(error),
        ..StageReport::default()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: <non-string payload>".to_string()
    }
}

/// Periodically run cleanup with a fixed max age. Wire this from app startup.
pub fn spawn_cleanup_task(
    orchestrator: Orchestrator,
    every: Duration,
    max_age: chrono::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = orchestrator.cleanup(max_age);
            counter!("scrape_cleanup_removed_total").increment(report.removed as u64);
        }
    })
}
