//! Background indexing jobs.
//!
//! A [`JobManager`] runs the [`Pipeline`] on a spawned task and keeps a
//! pollable status record per job. Only one indexing run may be active at a
//! time: the manager owns the single-run guard, and the synchronous HTTP route
//! takes the same guard through [`JobManager::try_acquire`].
//!
//! Finished jobs are kept for polling until more than the retention limit
//! have accumulated; the oldest finished ones are then dropped.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::RunError;
use crate::pipeline::{IndexSummary, Pipeline};
use crate::progress::TracingProgress;

/// Background job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted but not started.
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Queued | JobState::Running)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

/// Snapshot for one job status query.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub state: JobState,
    pub submitted_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub success_count: usize,
    pub failure_count: usize,
    /// Full run totals once the job has succeeded.
    pub summary: Option<IndexSummary>,
    pub error: Option<JobError>,
}

/// Finished jobs kept for status queries by default.
pub const DEFAULT_JOB_RETENTION: usize = 32;

struct JobRecord {
    seq: u64,
    snapshot: JobSnapshot,
    cancel: CancellationToken,
}

fn now() -> String {
    chrono::Local::now().to_rfc3339()
}

pub struct JobManager {
    pipeline: Pipeline,
    guard: Arc<Mutex<()>>,
    shutdown: CancellationToken,
    jobs: RwLock<HashMap<String, JobRecord>>,
    next_seq: AtomicU64,
    retention: usize,
}

impl JobManager {
    pub fn new(pipeline: Pipeline) -> Arc<Self> {
        Self::with_retention(pipeline, DEFAULT_JOB_RETENTION)
    }

    /// A manager that keeps at most `retention` finished jobs (at least one).
    pub fn with_retention(pipeline: Pipeline, retention: usize) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            guard: Arc::new(Mutex::new(())),
            shutdown: CancellationToken::new(),
            jobs: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            retention: retention.max(1),
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Take the single-run guard, or fail with [`RunError::Conflict`] if a run
    /// is already active.
    pub fn try_acquire(&self) -> Result<OwnedMutexGuard<()>, RunError> {
        Arc::clone(&self.guard)
            .try_lock_owned()
            .map_err(|_| RunError::Conflict)
    }

    /// A cancellation token for one run. It fires when [`cancel_all`] is
    /// called, so runs outside the job table stop on shutdown too.
    ///
    /// [`cancel_all`]: JobManager::cancel_all
    pub fn run_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Start a background run and return its job id.
    pub async fn submit(self: &Arc<Self>) -> Result<String, RunError> {
        let permit = self.try_acquire()?;
        let job_id = Uuid::new_v4().to_string();
        let cancel = self.run_token();

        self.jobs.write().await.insert(
            job_id.clone(),
            JobRecord {
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                snapshot: JobSnapshot {
                    job_id: job_id.clone(),
                    state: JobState::Queued,
                    submitted_at: now(),
                    started_at: None,
                    finished_at: None,
                    success_count: 0,
                    failure_count: 0,
                    summary: None,
                    error: None,
                },
                cancel: cancel.clone(),
            },
        );

        let manager = Arc::clone(self);
        let id = job_id.clone();
        tokio::spawn(async move {
            manager.process_job(&id, cancel, permit).await;
        });

        tracing::info!(%job_id, "indexing job submitted");
        Ok(job_id)
    }

    /// Drive one job to a terminal state. The guard is released only after
    /// the final snapshot is stored.
    async fn process_job(
        &self,
        job_id: &str,
        cancel: CancellationToken,
        permit: OwnedMutexGuard<()>,
    ) {
        self.update(job_id, |s| {
            s.state = JobState::Running;
            s.started_at = Some(now());
        })
        .await;

        let pipeline = self.pipeline.clone();
        let run =
            tokio::spawn(async move { pipeline.run(&cancel, &TracingProgress, None).await });
        let result = match run.await {
            Ok(result) => result,
            Err(err) => Err(RunError::Internal(anyhow::anyhow!(
                "indexing task aborted: {}",
                err
            ))),
        };

        self.finish(job_id, |s| {
            s.finished_at = Some(now());
            match result {
                Ok(summary) => {
                    s.state = JobState::Succeeded;
                    s.success_count = summary.success_count;
                    s.failure_count = summary.failure_count();
                    s.summary = Some(summary);
                }
                Err(err) => {
                    s.state = match err {
                        RunError::Cancelled => JobState::Cancelled,
                        RunError::TimedOut(_) => JobState::TimedOut,
                        _ => JobState::Failed,
                    };
                    tracing::warn!(job_id = %s.job_id, error = %err, "indexing job did not succeed");
                    s.error = Some(JobError {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        })
        .await;
        drop(permit);
    }

    async fn update(&self, job_id: &str, apply: impl FnOnce(&mut JobSnapshot)) {
        if let Some(record) = self.jobs.write().await.get_mut(job_id) {
            apply(&mut record.snapshot);
        }
    }

    /// Store the final snapshot and evict the oldest finished jobs beyond
    /// the retention limit.
    async fn finish(&self, job_id: &str, apply: impl FnOnce(&mut JobSnapshot)) {
        let mut jobs = self.jobs.write().await;
        if let Some(record) = jobs.get_mut(job_id) {
            apply(&mut record.snapshot);
        }

        let mut finished: Vec<(u64, String)> = jobs
            .iter()
            .filter(|(_, r)| r.snapshot.state.is_terminal())
            .map(|(id, r)| (r.seq, id.clone()))
            .collect();
        if finished.len() > self.retention {
            finished.sort_unstable();
            let excess = finished.len() - self.retention;
            for (_, id) in finished.into_iter().take(excess) {
                jobs.remove(&id);
            }
            tracing::debug!(evicted = excess, "dropped finished jobs past retention");
        }
    }

    pub async fn status(&self, job_id: &str) -> Option<JobSnapshot> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|r| r.snapshot.clone())
    }

    /// Request cancellation. Returns the snapshot at the time of the request,
    /// or `None` for an unknown id. Finished jobs are left as they are.
    pub async fn cancel(&self, job_id: &str) -> Option<JobSnapshot> {
        let jobs = self.jobs.read().await;
        let record = jobs.get(job_id)?;
        if !record.snapshot.state.is_terminal() {
            record.cancel.cancel();
            tracing::info!(%job_id, "indexing job cancellation requested");
        }
        Some(record.snapshot.clone())
    }

    /// Cancel every unfinished run, background or synchronous. Used on
    /// server shutdown.
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
    }

    /// Known jobs, oldest submission first.
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let jobs = self.jobs.read().await;
        let mut records: Vec<&JobRecord> = jobs.values().collect();
        records.sort_by_key(|r| r.seq);
        records.into_iter().map(|r| r.snapshot.clone()).collect()
    }
}
