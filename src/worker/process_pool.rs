//! Pool backend: each submission runs in a pool slot and `submit` blocks
//! until it is done, so handles are complete as soon as they exist

use crate::error::WorkerResult;
use crate::runner::ResolvedTask;
use crate::worker::{DoneOutcomes, JobHandle, JobOutcome, Partition, TaskPool, Worker};
use std::collections::HashSet;
use tracing::info;

pub struct ProcessPoolWorker {
    pool: TaskPool,
    outcomes: DoneOutcomes,
}

impl ProcessPoolWorker {
    pub fn new(size: usize) -> WorkerResult<Self> {
        info!(size, "initialising pool worker");
        Ok(Self {
            pool: TaskPool::new(size)?,
            outcomes: DoneOutcomes::default(),
        })
    }
}

impl Worker for ProcessPoolWorker {
    fn name(&self) -> &'static str {
        "pool"
    }

    fn submit(&mut self, task: ResolvedTask) -> WorkerResult<JobHandle> {
        let outcome = self.pool.run(task)?;
        Ok(self.outcomes.record(outcome))
    }

    fn poll_completed(&mut self, pending: &HashSet<JobHandle>) -> WorkerResult<Partition> {
        self.outcomes.partition(pending)
    }

    fn take_outcome(&mut self, handle: &JobHandle) -> WorkerResult<Option<JobOutcome>> {
        self.outcomes.take(handle)
    }

    fn shutdown(&mut self) {
        self.pool.shutdown();
    }
}
