//! Inline backend: tasks run to completion inside `submit`

use crate::error::{WorkerError, WorkerResult};
use crate::runner::ResolvedTask;
use crate::worker::{run_task, DoneOutcomes, JobHandle, JobOutcome, Partition, Worker};
use std::collections::HashSet;
use tracing::info;

#[derive(Debug, Default)]
pub struct SerialWorker {
    outcomes: DoneOutcomes,
    closed: bool,
}

impl SerialWorker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Worker for SerialWorker {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn submit(&mut self, task: ResolvedTask) -> WorkerResult<JobHandle> {
        if self.closed {
            return Err(WorkerError::ShutDown);
        }
        info!(task = %task.name(), "running task inline");
        let outcome = run_task(&task);
        Ok(self.outcomes.record(outcome))
    }

    fn poll_completed(&mut self, pending: &HashSet<JobHandle>) -> WorkerResult<Partition> {
        self.outcomes.partition(pending)
    }

    fn take_outcome(&mut self, handle: &JobHandle) -> WorkerResult<Option<JobOutcome>> {
        self.outcomes.take(handle)
    }

    fn shutdown(&mut self) {
        self.closed = true;
    }
}
