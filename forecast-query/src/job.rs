//! Asynchronous query jobs with a wall-clock budget.
//!
//! A job runs the synchronous engine on a blocking worker. If the budget
//! runs out, its cancellation token fires and the worker stops at the next
//! stage boundary, scan step or row. The job is marked [`JobStatus::Timeout`]
//! once the worker has stopped or [`STOP_GRACE`] has passed.
//!
//! Statuses of finished jobs are kept for the most recent
//! [`DEFAULT_RETAINED_JOBS`] jobs only.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{QueryEngine, QueryKind};
use crate::sink::RowSink;

/// Unique identifier for a query job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new job ID with a UUIDv7 (time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a query job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Success { num_rows: usize },
    Failed { message: String },
    Timeout,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Success { .. } | Self::Failed { .. } | Self::Timeout
        )
    }
}

/// How long a timed-out job waits for its worker to stop.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Finished job statuses kept by default.
pub const DEFAULT_RETAINED_JOBS: usize = 1024;

/// Job statuses. Finished jobs are evicted oldest first beyond `retain`.
struct JobTable {
    statuses: HashMap<JobId, JobStatus>,
    finished: VecDeque<JobId>,
    retain: usize,
}

impl JobTable {
    fn new(retain: usize) -> Self {
        Self {
            statuses: HashMap::new(),
            finished: VecDeque::new(),
            retain,
        }
    }

    fn set(&mut self, id: JobId, status: JobStatus) {
        let finished = status.is_finished();
        if self.statuses.insert(id, status).is_some_and(|old| old.is_finished()) {
            return;
        }
        if finished {
            self.finished.push_back(id);
            while self.finished.len() > self.retain {
                if let Some(old) = self.finished.pop_front() {
                    self.statuses.remove(&old);
                }
            }
        }
    }
}

/// Runs queries in the background and tracks their status.
#[derive(Clone)]
pub struct QueryJobRunner {
    engine: Arc<QueryEngine>,
    jobs: Arc<RwLock<JobTable>>,
}

impl QueryJobRunner {
    pub fn new(engine: Arc<QueryEngine>) -> Self {
        Self {
            engine,
            jobs: Arc::new(RwLock::new(JobTable::new(DEFAULT_RETAINED_JOBS))),
        }
    }

    /// Keep the statuses of at most `retain` finished jobs.
    #[must_use]
    pub fn with_retained_jobs(self, retain: usize) -> Self {
        Self {
            engine: self.engine,
            jobs: Arc::new(RwLock::new(JobTable::new(retain))),
        }
    }

    /// Queue a job and run it on a background task.
    pub async fn submit<S>(
        &self,
        kind: QueryKind,
        spec: Value,
        sink: S,
    ) -> (JobId, JoinHandle<JobStatus>)
    where
        S: RowSink + Send + 'static,
    {
        let id = JobId::new();
        self.set_status(id, JobStatus::Queued).await;
        let runner = self.clone();
        let handle = tokio::spawn(async move { runner.execute(id, kind, spec, sink).await });
        (id, handle)
    }

    /// Run a job to completion and return its final status.
    pub async fn run<S>(&self, kind: QueryKind, spec: Value, sink: S) -> (JobId, JobStatus)
    where
        S: RowSink + Send + 'static,
    {
        let id = JobId::new();
        self.set_status(id, JobStatus::Queued).await;
        let status = self.execute(id, kind, spec, sink).await;
        (id, status)
    }

    pub async fn status(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.read().await.statuses.get(&id).cloned()
    }

    async fn execute<S>(&self, id: JobId, kind: QueryKind, spec: Value, mut sink: S) -> JobStatus
    where
        S: RowSink + Send + 'static,
    {
        self.set_status(id, JobStatus::Running).await;

        let token = CancellationToken::new();
        let worker_token = token.clone();
        let engine = Arc::clone(&self.engine);
        let mut worker = tokio::task::spawn_blocking(move || {
            engine.run(kind, &spec, &mut sink, Some(worker_token))
        });

        let budget = self.engine.config().timeout;
        let status = match tokio::time::timeout(budget, &mut worker).await {
            Ok(Ok(Ok(num_rows))) => JobStatus::Success { num_rows },
            Ok(Ok(Err(e))) => JobStatus::Failed {
                message: e.to_string(),
            },
            Ok(Err(join_error)) => JobStatus::Failed {
                message: format!("query worker failed: {}", join_error),
            },
            Err(_) => {
                token.cancel();
                match tokio::time::timeout(STOP_GRACE, worker).await {
                    Ok(_) => debug!(job_id = %id, "Query worker stopped"),
                    Err(_) => warn!(
                        job_id = %id,
                        grace = ?STOP_GRACE,
                        "Query worker still running after cancellation"
                    ),
                }
                JobStatus::Timeout
            }
        };

        match &status {
            JobStatus::Success { num_rows } => {
                info!(job_id = %id, kind = kind.as_str(), num_rows, "Query job succeeded")
            }
            JobStatus::Failed { message } => {
                warn!(job_id = %id, kind = kind.as_str(), error = %message, "Query job failed")
            }
            JobStatus::Timeout => {
                warn!(job_id = %id, kind = kind.as_str(), budget = ?budget, "Query job timed out")
            }
            JobStatus::Queued | JobStatus::Running => {}
        }

        self.set_status(id, status.clone()).await;
        status
    }

    async fn set_status(&self, id: JobId, status: JobStatus) {
        self.jobs.write().await.set(id, status);
    }
}
