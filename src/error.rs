// src/error.rs
use thiserror::Error;

use crate::job::{JobId, JobStatus};

pub type Result<T> = std::result::Result<T, AggregatorError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    #[error("Missing required field: business_name")]
    MissingBusinessName,

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job is not completed. Current status: {status}")]
    NotCompleted { job_id: JobId, status: JobStatus },

    #[error("A scrape for '{business_name}' is already running (job {job_id})")]
    AlreadyRunning { business_name: String, job_id: JobId },

    #[error("Pipeline driver failed: {0}")]
    Driver(String),
}
