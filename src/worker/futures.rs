//! Futures backend: submissions return immediately and `poll_completed`
//! waits for the first of the pending handles to resolve

use crate::error::{WorkerError, WorkerResult};
use crate::runner::ResolvedTask;
use crate::worker::{FuturePool, JobHandle, JobOutcome, Partition, Worker};
use std::collections::HashSet;
use tracing::{debug, info};

pub struct FuturesWorker {
    pool: FuturePool,
}

impl FuturesWorker {
    pub fn new(size: usize) -> WorkerResult<Self> {
        info!(size, "initialising futures worker");
        Ok(Self {
            pool: FuturePool::new(size)?,
        })
    }

    fn future_id(&self, handle: &JobHandle) -> WorkerResult<u64> {
        match handle {
            JobHandle::Future(id) if self.pool.knows(*id) => Ok(*id),
            other => Err(WorkerError::UnknownHandle(other.to_string())),
        }
    }
}

impl Worker for FuturesWorker {
    fn name(&self) -> &'static str {
        "futures"
    }

    fn submit(&mut self, task: ResolvedTask) -> WorkerResult<JobHandle> {
        let name = task.name().to_string();
        let id = self.pool.spawn(task)?;
        debug!(task = %name, id, "submitted to future pool");
        Ok(JobHandle::Future(id))
    }

    fn poll_completed(&mut self, pending: &HashSet<JobHandle>) -> WorkerResult<Partition> {
        let ids = pending
            .iter()
            .map(|handle| self.future_id(handle))
            .collect::<WorkerResult<HashSet<u64>>>()?;

        let done = self.pool.wait_any(&ids)?;
        let (completed, still_pending): (HashSet<_>, HashSet<_>) = pending
            .iter()
            .cloned()
            .partition(|handle| matches!(handle, JobHandle::Future(id) if done.contains(id)));
        debug!(
            completed = completed.len(),
            pending = still_pending.len(),
            "polled future pool"
        );
        Ok((completed, still_pending))
    }

    fn take_outcome(&mut self, handle: &JobHandle) -> WorkerResult<Option<JobOutcome>> {
        let id = self.future_id(handle)?;
        Ok(self.pool.take(id))
    }

    fn shutdown(&mut self) {
        self.pool.shutdown();
    }
}
