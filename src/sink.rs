// src/sink.rs
//! Optional write-through of finished jobs. The orchestrator works fully
//! in memory; a sink only receives a copy once a job turns terminal.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::job::JobResults;

#[async_trait::async_trait]
pub trait JobSink: Send + Sync {
    async fn store(&self, results: &JobResults) -> Result<()>;
}

pub type DynSink = Arc<dyn JobSink>;

/// Writes `{dir}/{job_id}.json`, creating `dir` on first use.
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, results: &JobResults) -> PathBuf {
        self.dir.join(format!("{}.json", results.job_id))
    }
}

#[async_trait::async_trait]
impl JobSink for JsonDirSink {
    async fn store(&self, results: &JobResults) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating results dir {}", self.dir.display()))?;
        let body = serde_json::to_vec_pretty(results).context("serializing job results")?;
        let path = self.path_for(results);
        // Write to a temp file first so readers never see a half-written snapshot.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming into {}", path.display()))?;
        tracing::debug!(target: "sink", path = %path.display(), "job results stored");
        Ok(())
    }
}

// --- Test helper ---
#[derive(Default)]
pub struct MemorySink {
    pub stored: Mutex<Vec<JobResults>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<JobResults> {
        self.stored.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait::async_trait]
impl JobSink for MemorySink {
    async fn store(&self, results: &JobResults) -> Result<()> {
        self.stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(results.clone());
        Ok(())
    }
}
