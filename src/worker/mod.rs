//! Worker backends
//!
//! Every backend implements the same dispatch contract: `submit` starts or
//! enqueues a resolved task and hands back a `JobHandle`; `poll_completed`
//! partitions a caller-owned set of handles into completed and still pending;
//! `take_outcome` yields the outcome of a completed handle; `shutdown` releases
//! the backend without waiting for outstanding work.
//!
//! Failed tasks are reported as `JobOutcome::Failed`, never retried here.

pub mod batch;
pub mod cluster;
pub mod futures;
pub mod pool;
pub mod process_pool;
pub mod serial;

pub use batch::BatchWorker;
pub use cluster::{ClusterWorker, LocalCluster, SchedulerClient};
pub use futures::FuturesWorker;
pub use pool::{FuturePool, TaskPool};
pub use process_pool::ProcessPoolWorker;
pub use serial::SerialWorker;

use crate::config::WorkerConfig;
use crate::error::{RunResult, WorkerError, WorkerResult};
use crate::runner::{ResolvedTask, TaskResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Backend-specific token for a submitted task
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobHandle {
    /// Finished by the time `submit` returned
    Done(u64),
    /// Running on an in-process future pool
    Future(u64),
    /// Submitted to an external batch queue
    Batch { job_id: String, script: PathBuf },
    /// Submitted to a cluster scheduling client
    Cluster(u64),
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobHandle::Done(id) => write!(f, "done#{}", id),
            JobHandle::Future(id) => write!(f, "future#{}", id),
            JobHandle::Batch { job_id, .. } => write!(f, "batch#{}", job_id),
            JobHandle::Cluster(id) => write!(f, "cluster#{}", id),
        }
    }
}

/// Terminal state of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum JobOutcome {
    Completed(TaskResult),
    Failed(String),
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }

    pub fn into_result(self) -> Result<TaskResult, String> {
        match self {
            JobOutcome::Completed(result) => Ok(result),
            JobOutcome::Failed(message) => Err(message),
        }
    }
}

impl From<RunResult<TaskResult>> for JobOutcome {
    fn from(result: RunResult<TaskResult>) -> Self {
        match result {
            Ok(result) => JobOutcome::Completed(result),
            Err(e) => JobOutcome::Failed(e.to_string()),
        }
    }
}

/// `(completed, still_pending)`
pub type Partition = (HashSet<JobHandle>, HashSet<JobHandle>);

/// Uniform dispatch contract over execution backends
pub trait Worker: Send {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Start or enqueue a task
    fn submit(&mut self, task: ResolvedTask) -> WorkerResult<JobHandle>;

    /// Split `pending` into completed and still-pending handles
    ///
    /// Blocking backends return immediately; future pools wait until at least
    /// one handle has resolved. An empty set returns two empty sets at once.
    fn poll_completed(&mut self, pending: &HashSet<JobHandle>) -> WorkerResult<Partition>;

    /// Outcome of a completed handle; `None` if not available (yet)
    fn take_outcome(&mut self, handle: &JobHandle) -> WorkerResult<Option<JobOutcome>>;

    /// Release backend resources; idempotent and non-blocking
    fn shutdown(&mut self);
}

/// Available backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    #[default]
    Serial,
    Pool,
    Futures,
    Batch,
    Cluster,
}

impl WorkerKind {
    pub const ALL: [&'static str; 5] = ["serial", "pool", "futures", "batch", "cluster"];
}

impl FromStr for WorkerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serial" => Ok(WorkerKind::Serial),
            "pool" | "mp" => Ok(WorkerKind::Pool),
            "futures" | "cf" => Ok(WorkerKind::Futures),
            "batch" | "slurm" => Ok(WorkerKind::Batch),
            "cluster" | "dask" => Ok(WorkerKind::Cluster),
            other => Err(format!(
                "unknown worker '{}', expected one of: {}",
                other,
                WorkerKind::ALL.join(", ")
            )),
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerKind::Serial => "serial",
            WorkerKind::Pool => "pool",
            WorkerKind::Futures => "futures",
            WorkerKind::Batch => "batch",
            WorkerKind::Cluster => "cluster",
        };
        write!(f, "{}", name)
    }
}

/// Build the worker described by `config`
pub fn create_worker(config: &WorkerConfig) -> WorkerResult<Box<dyn Worker>> {
    let size = config.pool_size();
    let worker: Box<dyn Worker> = match config.kind {
        WorkerKind::Serial => Box::new(SerialWorker::new()),
        WorkerKind::Pool => Box::new(ProcessPoolWorker::new(size)?),
        WorkerKind::Futures => Box::new(FuturesWorker::new(size)?),
        WorkerKind::Batch => Box::new(BatchWorker::new(config.batch.clone())),
        WorkerKind::Cluster => Box::new(ClusterWorker::new(LocalCluster::new(size)?)),
    };
    debug!(worker = worker.name(), pool_size = size, "created worker");
    Ok(worker)
}

/// Run a task on the current thread, turning panics into failures
pub(crate) fn run_task(task: &ResolvedTask) -> JobOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
        Ok(result) => JobOutcome::from(result),
        Err(_) => JobOutcome::Failed(format!("task '{}' panicked", task.name())),
    }
}

/// Poll until every handle has completed, collecting outcomes in completion order
///
/// `interval` is slept between polls that complete nothing (batch queues are
/// polled externally and should not be hammered).
pub fn wait_all(
    worker: &mut dyn Worker,
    handles: HashSet<JobHandle>,
    interval: Duration,
) -> WorkerResult<Vec<(JobHandle, JobOutcome)>> {
    let mut pending = handles;
    let mut finished = Vec::new();

    while !pending.is_empty() {
        let (completed, still_pending) = worker.poll_completed(&pending)?;
        if completed.is_empty() {
            thread::sleep(interval);
        }
        for handle in completed {
            let outcome = worker.take_outcome(&handle)?.unwrap_or_else(|| {
                JobOutcome::Failed(format!("{} completed without an outcome", handle))
            });
            finished.push((handle, outcome));
        }
        pending = still_pending;
    }

    Ok(finished)
}

/// Shared bookkeeping for backends whose handles finish at submission
#[derive(Debug, Default)]
pub(crate) struct DoneOutcomes {
    next_id: u64,
    outcomes: std::collections::HashMap<u64, JobOutcome>,
}

impl DoneOutcomes {
    pub(crate) fn record(&mut self, outcome: JobOutcome) -> JobHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.outcomes.insert(id, outcome);
        JobHandle::Done(id)
    }

    /// Everything is complete; handles from elsewhere are rejected
    pub(crate) fn partition(&self, pending: &HashSet<JobHandle>) -> WorkerResult<Partition> {
        for handle in pending {
            match handle {
                JobHandle::Done(id) if *id < self.next_id => {}
                other => return Err(WorkerError::UnknownHandle(other.to_string())),
            }
        }
        Ok((pending.clone(), HashSet::new()))
    }

    pub(crate) fn take(&mut self, handle: &JobHandle) -> WorkerResult<Option<JobOutcome>> {
        match handle {
            JobHandle::Done(id) if *id < self.next_id => Ok(self.outcomes.remove(id)),
            other => Err(WorkerError::UnknownHandle(other.to_string())),
        }
    }
}
