//! Serialized tasks
//!
//! Backends that run tasks in another process (batch queues) persist the
//! resolved task to a file, and the remote side runs it with `run-task` and
//! writes the outcome next to it.

use crate::error::{Result, WorkerError, WorkerResult};
use crate::runner::ResolvedTask;
use crate::worker::JobOutcome;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the serialized task inside its output directory
pub const TASK_FILE: &str = "_task.json";

/// File name of the serialized outcome inside its output directory
pub const RESULT_FILE: &str = "_result.json";

/// Persists a task as a unit another process can run
pub trait TaskSerializer: Send {
    /// Write the task and return the path of the runnable unit
    fn save(&self, task: &ResolvedTask) -> WorkerResult<PathBuf>;
}

/// Writes the task as JSON into its own output directory
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTaskSerializer;

impl TaskSerializer for JsonTaskSerializer {
    fn save(&self, task: &ResolvedTask) -> WorkerResult<PathBuf> {
        fs::create_dir_all(task.output_dir())?;
        let path = task.output_dir().join(TASK_FILE);
        let json = serde_json::to_string_pretty(task)
            .map_err(|e| WorkerError::Serialize(e.to_string()))?;
        fs::write(&path, json)?;
        debug!(task = %task.name(), path = %path.display(), "saved task");
        Ok(path)
    }
}

/// Load a task written by `JsonTaskSerializer`
pub fn load_task(path: &Path) -> Result<ResolvedTask> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Run a serialized task and write its outcome next to the task file
pub fn run_serialized(path: &Path) -> Result<JobOutcome> {
    let task = load_task(path)?;
    info!(task = %task.name(), "running serialized task");

    let outcome = JobOutcome::from(task.run());
    let result_path = path
        .parent()
        .map(|dir| dir.join(RESULT_FILE))
        .unwrap_or_else(|| PathBuf::from(RESULT_FILE));
    fs::write(&result_path, serde_json::to_string_pretty(&outcome)?)?;
    Ok(outcome)
}

/// Read the outcome written by `run_serialized`, if it exists yet
pub fn read_outcome(output_dir: &Path) -> WorkerResult<Option<JobOutcome>> {
    let path = output_dir.join(RESULT_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)?;
    let outcome =
        serde_json::from_str(&contents).map_err(|e| WorkerError::Serialize(e.to_string()))?;
    Ok(Some(outcome))
}
