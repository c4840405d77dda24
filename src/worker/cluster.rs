//! Cluster backend
//!
//! `ClusterWorker` talks to a scheduler through the `SchedulerClient` trait.
//! `LocalCluster` is the in-process client: a future pool standing in for a
//! set of remote workers.

use crate::error::{WorkerError, WorkerResult};
use crate::runner::ResolvedTask;
use crate::worker::{FuturePool, JobHandle, JobOutcome, Partition, Worker};
use std::collections::HashSet;
use tracing::{debug, info};

/// Connection to a task scheduler
pub trait SchedulerClient: Send {
    fn submit(&mut self, task: ResolvedTask) -> WorkerResult<u64>;

    /// Whether `id` was issued by this client
    fn knows(&self, id: u64) -> bool;

    /// Block until at least one of `ids` is finished; return every finished id
    fn wait_any(&mut self, ids: &HashSet<u64>) -> WorkerResult<HashSet<u64>>;

    fn take(&mut self, id: u64) -> Option<JobOutcome>;

    fn close(&mut self);
}

pub struct LocalCluster {
    pool: FuturePool,
}

impl LocalCluster {
    pub fn new(workers: usize) -> WorkerResult<Self> {
        info!(workers, "starting local cluster");
        Ok(Self {
            pool: FuturePool::new(workers)?,
        })
    }
}

impl SchedulerClient for LocalCluster {
    fn submit(&mut self, task: ResolvedTask) -> WorkerResult<u64> {
        self.pool.spawn(task)
    }

    fn knows(&self, id: u64) -> bool {
        self.pool.knows(id)
    }

    fn wait_any(&mut self, ids: &HashSet<u64>) -> WorkerResult<HashSet<u64>> {
        self.pool.wait_any(ids)
    }

    fn take(&mut self, id: u64) -> Option<JobOutcome> {
        self.pool.take(id)
    }

    fn close(&mut self) {
        self.pool.shutdown();
    }
}

pub struct ClusterWorker<C: SchedulerClient = LocalCluster> {
    client: C,
    closed: bool,
}

impl<C: SchedulerClient> ClusterWorker<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            closed: false,
        }
    }

    fn cluster_id(&self, handle: &JobHandle) -> WorkerResult<u64> {
        match handle {
            JobHandle::Cluster(id) if self.client.knows(*id) => Ok(*id),
            other => Err(WorkerError::UnknownHandle(other.to_string())),
        }
    }
}

impl<C: SchedulerClient> Worker for ClusterWorker<C> {
    fn name(&self) -> &'static str {
        "cluster"
    }

    fn submit(&mut self, task: ResolvedTask) -> WorkerResult<JobHandle> {
        if self.closed {
            return Err(WorkerError::ShutDown);
        }
        let name = task.name().to_string();
        let id = self.client.submit(task)?;
        debug!(task = %name, id, "submitted to cluster");
        Ok(JobHandle::Cluster(id))
    }

    fn poll_completed(&mut self, pending: &HashSet<JobHandle>) -> WorkerResult<Partition> {
        let ids = pending
            .iter()
            .map(|handle| self.cluster_id(handle))
            .collect::<WorkerResult<HashSet<u64>>>()?;
        if ids.is_empty() {
            return Ok((HashSet::new(), HashSet::new()));
        }

        let done = self.client.wait_any(&ids)?;
        Ok(pending
            .iter()
            .cloned()
            .partition(|handle| matches!(handle, JobHandle::Cluster(id) if done.contains(id))))
    }

    fn take_outcome(&mut self, handle: &JobHandle) -> WorkerResult<Option<JobOutcome>> {
        let id = self.cluster_id(handle)?;
        Ok(self.client.take(id))
    }

    fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            self.client.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{register_function, Returned};
    use crate::spec::{Field, FieldType, Inputs, Value};
    use std::collections::HashMap;

    #[test]
    fn test_local_cluster_runs_functions() {
        register_function(
            "cluster_double",
            vec![Field::new("a", FieldType::Int)],
            vec!["out"],
            |inputs| {
                let a = inputs.get("a").and_then(Value::as_int).unwrap_or(0);
                Ok(Returned::Single(Value::Int(a * 2)))
            },
        )
        .unwrap();

        let mut worker = ClusterWorker::new(LocalCluster::new(2).unwrap());
        let mut handles = HashMap::new();
        for a in 1..=3i64 {
            let dir = tempfile::tempdir().unwrap();
            let task = ResolvedTask::function(
                format!("double{}", a),
                "cluster_double",
                Inputs::from([("a".to_string(), Value::Int(a))]),
                dir.path(),
            )
            .unwrap();
            handles.insert(worker.submit(task).unwrap(), a);
        }

        let mut pending: HashSet<JobHandle> = handles.keys().cloned().collect();
        while !pending.is_empty() {
            let (completed, still) = worker.poll_completed(&pending).unwrap();
            assert!(!completed.is_empty());
            for handle in completed {
                let result = worker.take_outcome(&handle).unwrap().unwrap().into_result().unwrap();
                assert_eq!(result.get("out"), Some(&Value::Int(handles[&handle] * 2)));
            }
            pending = still;
        }

        worker.shutdown();
        worker.shutdown();
    }

    /// Scheduler that never accepts work
    struct Rejecting;

    impl SchedulerClient for Rejecting {
        fn submit(&mut self, _task: ResolvedTask) -> WorkerResult<u64> {
            Err(WorkerError::Submission("scheduler unavailable".to_string()))
        }
        fn knows(&self, _id: u64) -> bool {
            false
        }
        fn wait_any(&mut self, _ids: &HashSet<u64>) -> WorkerResult<HashSet<u64>> {
            Ok(HashSet::new())
        }
        fn take(&mut self, _id: u64) -> Option<JobOutcome> {
            None
        }
        fn close(&mut self) {}
    }

    #[test]
    fn test_custom_scheduler_client() {
        let dir = tempfile::tempdir().unwrap();
        register_function("cluster_noop", vec![], vec![], |_| {
            Ok(Returned::Single(Value::Null))
        })
        .unwrap();
        let task = ResolvedTask::function("noop", "cluster_noop", Inputs::new(), dir.path()).unwrap();

        let mut worker = ClusterWorker::new(Rejecting);
        assert!(matches!(
            worker.submit(task),
            Err(WorkerError::Submission(_))
        ));
        assert!(matches!(
            worker.take_outcome(&JobHandle::Cluster(0)),
            Err(WorkerError::UnknownHandle(_))
        ));
    }
}
