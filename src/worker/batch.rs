//! Batch queue backend
//!
//! Each task is serialized to its output directory, wrapped in a small shell
//! script that runs it with `run-task`, and handed to an external submit
//! command (`sbatch` by default). Job ids are read from the submit command's
//! stdout. A job counts as pending while the status command still lists it.

use crate::config::BatchConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::runner::{read_outcome, JsonTaskSerializer, ResolvedTask, TaskSerializer};
use crate::worker::{JobHandle, JobOutcome, Partition, Worker};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

fn job_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("valid regex"))
}

/// First run of digits in the submit command's output
pub fn extract_job_id(stdout: &str) -> Option<String> {
    job_id_regex().find(stdout).map(|m| m.as_str().to_string())
}

/// Job ids in the first column of the status command's output
///
/// Header lines and other columns (times, node lists, job names) are ignored.
fn listed_job_ids(stdout: &str) -> HashSet<String> {
    stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(extract_job_id)
        .collect()
}

pub struct BatchWorker<S: TaskSerializer = JsonTaskSerializer> {
    config: BatchConfig,
    serializer: S,
    jobs: HashMap<String, PathBuf>,
    closed: bool,
}

impl BatchWorker<JsonTaskSerializer> {
    pub fn new(config: BatchConfig) -> Self {
        Self::with_serializer(config, JsonTaskSerializer)
    }
}

impl<S: TaskSerializer> BatchWorker<S> {
    pub fn with_serializer(config: BatchConfig, serializer: S) -> Self {
        Self {
            config,
            serializer,
            jobs: HashMap::new(),
            closed: false,
        }
    }

    /// Job ids submitted and not yet collected
    pub fn known_jobs(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    /// Write the script that runs `unit` on the compute node
    pub fn write_script(&self, task: &ResolvedTask, unit: &Path) -> WorkerResult<PathBuf> {
        let dir = unit.parent().unwrap_or_else(|| task.output_dir());
        let path = dir.join(format!("batchscript_{}.sh", task.hash()));
        let runner = self.config.runner_command()?;
        let contents = format!(
            "#!{}\n{} {}\n",
            self.config.interpreter,
            runner,
            unit.display()
        );
        fs::write(&path, contents)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }

        debug!(path = %path.display(), "wrote batch script");
        Ok(path)
    }

    fn submit_script(&self, script: &Path, job_name: &str) -> WorkerResult<String> {
        let (program, base_args) = self
            .config
            .submit_cmd
            .split_first()
            .ok_or_else(|| WorkerError::Submission("submit command is empty".to_string()))?;

        let output = Command::new(program)
            .args(base_args)
            .args(&self.config.submit_args)
            .arg("-J")
            .arg(job_name)
            .arg(script)
            .output()
            .map_err(|e| WorkerError::Submission(format!("failed to run '{}': {}", program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkerError::Submission(format!(
                "'{}' exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }

        extract_job_id(&stdout).ok_or_else(|| {
            WorkerError::Submission(format!(
                "could not find a job id in the output of '{}': {}",
                program,
                stdout.trim()
            ))
        })
    }

    fn query_status(&self, job_ids: &[&str]) -> WorkerResult<HashSet<String>> {
        let (program, base_args) = self
            .config
            .status_cmd
            .split_first()
            .ok_or_else(|| WorkerError::StatusQuery("status command is empty".to_string()))?;

        let output = Command::new(program)
            .args(base_args)
            .arg("-j")
            .arg(job_ids.join(","))
            .output()
            .map_err(|e| WorkerError::StatusQuery(format!("failed to run '{}': {}", program, e)))?;

        // finished jobs make some schedulers exit non-zero; stdout is still authoritative
        if !output.status.success() {
            debug!(status = %output.status, "status command exited unsuccessfully");
        }
        Ok(listed_job_ids(&String::from_utf8_lossy(&output.stdout)))
    }

    fn job_id<'a>(&self, handle: &'a JobHandle) -> WorkerResult<&'a str> {
        match handle {
            JobHandle::Batch { job_id, .. } if self.jobs.contains_key(job_id) => Ok(job_id.as_str()),
            other => Err(WorkerError::UnknownHandle(other.to_string())),
        }
    }
}

impl<S: TaskSerializer> Worker for BatchWorker<S> {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn submit(&mut self, task: ResolvedTask) -> WorkerResult<JobHandle> {
        if self.closed {
            return Err(WorkerError::ShutDown);
        }
        let unit = self.serializer.save(&task)?;
        let script = self.write_script(&task, &unit)?;
        let job_id = self.submit_script(&script, &task.job_name())?;

        info!(task = %task.name(), job_id = %job_id, "submitted batch job");
        self.jobs
            .insert(job_id.clone(), task.output_dir().to_path_buf());
        Ok(JobHandle::Batch { job_id, script })
    }

    fn poll_completed(&mut self, pending: &HashSet<JobHandle>) -> WorkerResult<Partition> {
        if pending.is_empty() {
            return Ok((HashSet::new(), HashSet::new()));
        }
        let mut job_ids = pending
            .iter()
            .map(|handle| self.job_id(handle))
            .collect::<WorkerResult<Vec<&str>>>()?;
        job_ids.sort_unstable();

        let listed = self.query_status(&job_ids)?;
        let (still_pending, completed): (HashSet<_>, HashSet<_>) =
            pending.iter().cloned().partition(|handle| {
                matches!(handle, JobHandle::Batch { job_id, .. } if listed.contains(job_id))
            });
        debug!(
            completed = completed.len(),
            pending = still_pending.len(),
            "polled batch queue"
        );
        Ok((completed, still_pending))
    }

    fn take_outcome(&mut self, handle: &JobHandle) -> WorkerResult<Option<JobOutcome>> {
        let job_id = self.job_id(handle)?.to_string();
        let outcome = match self.jobs.get(&job_id) {
            Some(dir) => read_outcome(dir)?,
            None => None,
        };
        self.jobs.remove(&job_id);
        Ok(Some(outcome.unwrap_or_else(|| {
            JobOutcome::Failed(format!("batch job {} left no result", job_id))
        })))
    }

    fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            if !self.jobs.is_empty() {
                warn!(count = self.jobs.len(), "leaving submitted batch jobs in the queue");
            }
        }
    }
}
