//! # Jobs
//! Job record state machine and the process-wide job store.
//!
//! A job is written only by its own pipeline task and read by any number of
//! pollers. Each record sits behind its own `RwLock`; the store map has a
//! separate lock that is held only for lookups, inserts and removals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::sources::{Finding, Source, SourceLocators};

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trimmed, lower-cased business name used for the one-running-job-per-name check.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Mutable state of one orchestration run.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: JobId,
    pub business_name: String,
    pub business_url: Option<String>,
    pub source_locators: SourceLocators,
    pub status: JobStatus,
    pub progress: u8,
    /// Every admitted finding, in discovery order.
    findings: Vec<Finding>,
    counts: BTreeMap<Source, usize>,
    pub total_unique: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(
        business_name: String,
        business_url: Option<String>,
        source_locators: SourceLocators,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            business_name,
            business_url,
            source_locators,
            status: JobStatus::Running,
            progress: 0,
            findings: Vec::new(),
            counts: Source::ALL.into_iter().map(|s| (s, 0)).collect(),
            total_unique: 0,
            started_at: now,
            ended_at: None,
            error: None,
        }
    }

    /// Append an admitted finding. Ignored once the job is terminal.
    pub fn append(&mut self, finding: Finding) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        *self.counts.entry(finding.source).or_insert(0) += 1;
        self.findings.push(finding);
        true
    }

    /// Raise progress while running. Never decreases and stays below 100
    /// until [`Job::complete`].
    pub fn advance_progress(&mut self, pct: u8) {
        if self.status.is_terminal() {
            return;
        }
        self.progress = self.progress.max(pct.min(99));
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.total_unique = self.findings.len();
        self.ended_at = Some(now);
        true
    }

    /// Mark failed, keeping whatever was accumulated.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.total_unique = self.findings.len();
        self.ended_at = Some(now);
        self.error = Some(error.into());
        true
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn count_for(&self, source: Source) -> usize {
        self.counts.get(&source).copied().unwrap_or(0)
    }

    /// Findings grouped per source, each group in discovery order.
    pub fn findings_by_source(&self) -> BTreeMap<Source, Vec<Finding>> {
        let mut out: BTreeMap<Source, Vec<Finding>> =
            Source::ALL.into_iter().map(|s| (s, Vec::new())).collect();
        for f in &self.findings {
            out.entry(f.source).or_default().push(f.clone());
        }
        out
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            per_source: self
                .counts
                .iter()
                .map(|(s, n)| (s.as_str().to_string(), *n))
                .collect(),
            total_unique: self.total_unique,
        }
    }

    /// Timestamp cleanup ages against.
    pub fn age_anchor(&self) -> DateTime<Utc> {
        self.ended_at.unwrap_or(self.started_at)
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.job_id,
            business_name: self.business_name.clone(),
            status: self.status,
            progress: self.progress,
            statistics: self.statistics(),
            start_time: self.started_at,
            end_time: self.ended_at,
            error: self.error.clone(),
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id,
            status: self.status,
            progress: self.progress,
            business_name: self.business_name.clone(),
            total_reviews: self.findings.len(),
            start_time: self.started_at,
            end_time: self.ended_at,
        }
    }

    pub fn results(&self) -> JobResults {
        JobResults {
            job_id: self.job_id,
            status: self.status,
            is_final: self.status.is_terminal(),
            business_name: self.business_name.clone(),
            business_url: self.business_url.clone(),
            total_reviews: self.findings.len(),
            statistics: self.statistics(),
            results: self
                .findings_by_source()
                .into_iter()
                .map(|(s, v)| (s.as_str().to_string(), v))
                .collect(),
            all_reviews: self.findings.clone(),
            start_time: self.started_at,
            end_time: self.ended_at,
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    #[serde(flatten)]
    pub per_source: BTreeMap<String, usize>,
    pub total_unique: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub business_name: String,
    pub status: JobStatus,
    pub progress: u8,
    pub statistics: Statistics,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub business_name: String,
    pub total_reviews: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Full snapshot of a job, including every finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResults {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(rename = "final")]
    pub is_final: bool,
    pub business_name: String,
    pub business_url: Option<String>,
    pub total_reviews: usize,
    pub statistics: Statistics,
    pub results: BTreeMap<String, Vec<Finding>>,
    pub all_reviews: Vec<Finding>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// One job behind its own lock.
#[derive(Debug)]
pub struct JobRecord {
    id: JobId,
    name_key: String,
    inner: RwLock<Job>,
}

impl JobRecord {
    fn new(job: Job) -> Self {
        Self {
            id: job.job_id,
            name_key: name_key(&job.business_name),
            inner: RwLock::new(job),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Job> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Job> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> JobStatus {
        self.read().status
    }
}

/// Mapping job id -> record, owned by one orchestrator.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Arc<JobRecord>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `job` unless another job for the same business name is still running.
    /// On conflict returns the id of the running job.
    pub fn insert_exclusive(&self, job: Job) -> Result<Arc<JobRecord>, JobId> {
        let record = Arc::new(JobRecord::new(job));
        let mut map = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = map
            .values()
            .find(|r| r.name_key == record.name_key && r.status() == JobStatus::Running)
        {
            return Err(existing.id);
        }
        map.insert(record.id, Arc::clone(&record));
        Ok(record)
    }

    pub fn get(&self, id: &JobId) -> Option<Arc<JobRecord>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// All records, oldest first.
    pub fn records(&self) -> Vec<Arc<JobRecord>> {
        let mut v: Vec<Arc<JobRecord>> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        v.sort_by_key(|r| r.read().started_at);
        v
    }

    /// Remove every record for which `pred` holds. Returns how many were removed.
    pub fn remove_where<F>(&self, mut pred: F) -> usize
    where
        F: FnMut(&Job) -> bool,
    {
        let mut map = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|_, r| !pred(&*r.read()));
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn running_count(&self) -> usize {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| r.status() == JobStatus::Running)
            .count()
    }
}
