//! Runtimes shared by the in-process backends
//!
//! Every pool owns its own tokio runtime. Tasks run on the blocking thread
//! pool and a semaphore sized to the pool bounds how many run at once.

use crate::error::{WorkerError, WorkerResult};
use crate::runner::ResolvedTask;
use crate::worker::{run_task, JobOutcome};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A bounded set of slots for running tasks
pub struct TaskPool {
    runtime: Option<Runtime>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl TaskPool {
    pub fn new(size: usize) -> WorkerResult<Self> {
        let size = size.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(size)
            .thread_name("taskwright-worker")
            .enable_all()
            .build()?;

        debug!(size, "started task pool");
        Ok(Self {
            runtime: Some(runtime),
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_shut_down(&self) -> bool {
        self.runtime.is_none()
    }

    fn handle(&self) -> WorkerResult<&Handle> {
        self.runtime
            .as_ref()
            .map(Runtime::handle)
            .ok_or(WorkerError::ShutDown)
    }

    /// Start `task` as soon as a slot is free
    pub fn spawn(&self, task: ResolvedTask) -> WorkerResult<JoinHandle<JobOutcome>> {
        let handle = self.handle()?;
        let permits = Arc::clone(&self.permits);

        Ok(handle.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return JobOutcome::Failed(format!("pool closed before '{}' started", task.name()));
            };
            let name = task.name().to_string();
            tokio::task::spawn_blocking(move || run_task(&task))
                .await
                .unwrap_or_else(|e| JobOutcome::Failed(format!("task '{}' aborted: {}", name, e)))
        }))
    }

    /// Run `task` and block until it finishes
    pub fn run(&self, task: ResolvedTask) -> WorkerResult<JobOutcome> {
        let name = task.name().to_string();
        let job = self.spawn(task)?;
        self.handle()?.block_on(job).map_err(|e| {
            WorkerError::Submission(format!("pool dropped task '{}' before it finished: {}", name, e))
        })
    }

    /// Stop accepting work; queued tasks are dropped and running ones are not joined
    pub fn shutdown(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            self.permits.close();
            runtime.shutdown_background();
            debug!(size = self.size, "task pool shut down");
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

type Completion = BoxFuture<'static, (u64, JobOutcome)>;

/// A task pool that hands out ids and reports whichever tasks finish first
pub struct FuturePool {
    pool: TaskPool,
    running: FuturesUnordered<Completion>,
    in_flight: HashSet<u64>,
    ready: HashMap<u64, JobOutcome>,
    next_id: u64,
}

impl FuturePool {
    pub fn new(size: usize) -> WorkerResult<Self> {
        Ok(Self {
            pool: TaskPool::new(size)?,
            running: FuturesUnordered::new(),
            in_flight: HashSet::new(),
            ready: HashMap::new(),
            next_id: 0,
        })
    }

    pub fn spawn(&mut self, task: ResolvedTask) -> WorkerResult<u64> {
        let id = self.next_id;
        let name = task.name().to_string();
        let job = self.pool.spawn(task)?;

        self.running.push(
            async move {
                let outcome = job.await.unwrap_or_else(|e| {
                    JobOutcome::Failed(format!("task '{}' was cancelled: {}", name, e))
                });
                (id, outcome)
            }
            .boxed(),
        );
        self.next_id += 1;
        self.in_flight.insert(id);
        Ok(id)
    }

    /// Whether `id` was issued by this pool
    pub fn knows(&self, id: u64) -> bool {
        id < self.next_id
    }

    fn is_done(&self, id: u64) -> bool {
        self.knows(id) && !self.in_flight.contains(&id)
    }

    fn record(&mut self, id: u64, outcome: JobOutcome) {
        self.in_flight.remove(&id);
        self.ready.insert(id, outcome);
    }

    /// Collect every completion that is already available without blocking
    fn drain(&mut self) {
        while let Some(Some((id, outcome))) = self.running.next().now_or_never() {
            self.record(id, outcome);
        }
    }

    /// Block until at least one of `ids` has resolved, then return all that have
    pub fn wait_any(&mut self, ids: &HashSet<u64>) -> WorkerResult<HashSet<u64>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let handle = self.pool.handle()?.clone();
        self.drain();

        while !ids.iter().any(|id| self.is_done(*id)) {
            match handle.block_on(self.running.next()) {
                Some((id, outcome)) => self.record(id, outcome),
                None => return Err(WorkerError::ShutDown),
            }
            self.drain();
        }

        Ok(ids.iter().copied().filter(|id| self.is_done(*id)).collect())
    }

    pub fn take(&mut self, id: u64) -> Option<JobOutcome> {
        self.ready.remove(&id)
    }

    pub fn shutdown(&mut self) {
        if self.pool.is_shut_down() {
            return;
        }
        if !self.in_flight.is_empty() {
            warn!(count = self.in_flight.len(), "abandoning in-flight tasks");
        }
        self.running = FuturesUnordered::new();
        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{register_function, InvocationBuilder, Returned};
    use crate::spec::{Inputs, Value};
    use std::path::Path;
    use std::thread;
    use std::time::{Duration, Instant};

    fn shell_task(dir: &Path, command: &str) -> ResolvedTask {
        let values = Inputs::from([
            ("executable".to_string(), Value::from(vec!["sh", "-c"])),
            ("args".to_string(), Value::from(command)),
        ]);
        ResolvedTask::command("sh", InvocationBuilder::Shell, vec![], vec![], values, dir)
            .unwrap()
            .with_strip(true)
    }

    #[test]
    fn test_task_pool_runs_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let pool = TaskPool::new(2).unwrap();
        let outcome = pool.run(shell_task(dir.path(), "echo pooled")).unwrap();
        assert_eq!(outcome.into_result().unwrap().stdout(), Some("pooled"));
    }

    #[test]
    fn test_task_pool_bounds_concurrency() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let mut pool = FuturePool::new(1).unwrap();

        let start = Instant::now();
        let first = pool.spawn(shell_task(a.path(), "sleep 1")).unwrap();
        let second = pool.spawn(shell_task(b.path(), "sleep 1")).unwrap();
        let mut pending = HashSet::from([first, second]);
        while !pending.is_empty() {
            let done = pool.wait_any(&pending).unwrap();
            pending.retain(|id| !done.contains(id));
        }
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn test_task_pool_survives_panics() {
        register_function("pool_panics", vec![], vec![], |_| panic!("boom")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let task = ResolvedTask::function("panics", "pool_panics", Inputs::new(), dir.path()).unwrap();

        let pool = TaskPool::new(1).unwrap();
        assert!(!pool.run(task).unwrap().is_completed());

        let again = tempfile::tempdir().unwrap();
        let outcome = pool.run(shell_task(again.path(), "echo still")).unwrap();
        assert!(outcome.is_completed());
    }

    #[test]
    fn test_task_pool_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = TaskPool::new(1).unwrap();
        pool.shutdown();
        pool.shutdown();
        assert!(pool.is_shut_down());
        assert!(matches!(
            pool.spawn(shell_task(dir.path(), "true")),
            Err(WorkerError::ShutDown)
        ));
    }

    #[test]
    fn test_wait_any_returns_first_finisher() {
        let slow = tempfile::tempdir().unwrap();
        let fast = tempfile::tempdir().unwrap();
        let mut pool = FuturePool::new(2).unwrap();

        let slow_id = pool.spawn(shell_task(slow.path(), "sleep 2; echo slow")).unwrap();
        let fast_id = pool.spawn(shell_task(fast.path(), "echo fast")).unwrap();

        let done = pool.wait_any(&HashSet::from([slow_id, fast_id])).unwrap();
        assert!(done.contains(&fast_id));
        assert!(!done.contains(&slow_id));

        let outcome = pool.take(fast_id).unwrap();
        assert_eq!(outcome.into_result().unwrap().stdout(), Some("fast"));
        assert!(pool.take(fast_id).is_none());

        pool.shutdown();
    }

    #[test]
    fn test_wait_any_reports_every_finished_task() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let mut pool = FuturePool::new(2).unwrap();

        let first = pool.spawn(shell_task(a.path(), "echo a")).unwrap();
        let second = pool.spawn(shell_task(b.path(), "echo b")).unwrap();
        thread::sleep(Duration::from_secs(1));

        let done = pool.wait_any(&HashSet::from([first, second])).unwrap();
        assert_eq!(done, HashSet::from([first, second]));
    }

    #[test]
    fn test_wait_any_empty_set() {
        let mut pool = FuturePool::new(1).unwrap();
        assert!(pool.wait_any(&HashSet::new()).unwrap().is_empty());
    }

    #[test]
    fn test_spawn_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = FuturePool::new(1).unwrap();
        pool.shutdown();
        pool.shutdown();
        assert!(matches!(
            pool.spawn(shell_task(dir.path(), "true")),
            Err(WorkerError::ShutDown)
        ));
    }
}
