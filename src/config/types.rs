//! Core configuration types
//!
//! This module defines the data structures that represent a taskwright.yml configuration file.

use crate::error::{ConfigError, ConfigResult, WorkerError, WorkerResult};
use crate::runner::{InvocationBuilder, ResolvedTask};
use crate::spec::{Field, FieldType, Inputs, TaskSpec, Value};
use crate::worker::WorkerKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Application name (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Application usage description (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,

    /// Directory under which each task gets its own output directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_root: Option<PathBuf>,

    /// Trim whitespace from captured stdout/stderr
    #[serde(default)]
    pub strip: bool,

    /// Execution backend
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Tasks defined in the configuration
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,

    /// Directory of the file this was loaded from
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Config {
    pub fn task(&self, name: &str) -> ConfigResult<&TaskConfig> {
        self.tasks
            .get(name)
            .ok_or_else(|| ConfigError::TaskNotFound(name.to_string()))
    }

    /// Root for task output directories
    ///
    /// Relative paths are taken from the config file's directory; without a
    /// setting the platform cache directory is used.
    pub fn output_root(&self) -> PathBuf {
        match &self.output_root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => self
                .base_dir
                .as_deref()
                .unwrap_or_else(|| Path::new("."))
                .join(root),
            None => directories::ProjectDirs::from("", "", "taskwright")
                .map(|dirs| dirs.cache_dir().to_path_buf())
                .unwrap_or_else(|| env::temp_dir().join("taskwright")),
        }
    }

    /// Bind `values` to the task `name` and place it under the output root
    pub fn resolve_task(&self, name: &str, values: Inputs) -> ConfigResult<ResolvedTask> {
        let task = self.task(name)?;
        let resolved = task
            .resolve(name, values, &self.output_root())
            .map_err(|source| ConfigError::TaskSpec {
                task: name.to_string(),
                source,
            })?;
        Ok(resolved.with_strip(self.strip))
    }
}

/// Worker selection and tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub kind: WorkerKind,

    /// Threads for the pool, futures and cluster backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,

    /// Delay between polls that complete nothing, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub batch: BatchConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            kind: WorkerKind::default(),
            pool_size: None,
            poll_interval_ms: default_poll_interval_ms(),
            batch: BatchConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn pool_size(&self) -> usize {
        self.pool_size.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// How batch jobs are submitted and tracked
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Submission command; `-J <job name> <script>` is appended
    #[serde(default = "default_submit_cmd", deserialize_with = "deserialize_command")]
    pub submit_cmd: Vec<String>,

    /// Extra scheduler arguments placed before `-J`
    #[serde(default, deserialize_with = "deserialize_command")]
    pub submit_args: Vec<String>,

    /// Status command; `-j <ids>` is appended
    #[serde(default = "default_status_cmd", deserialize_with = "deserialize_command")]
    pub status_cmd: Vec<String>,

    /// Shebang interpreter of the generated script
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Command the script runs with the task file as its argument
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            submit_cmd: default_submit_cmd(),
            submit_args: Vec::new(),
            status_cmd: default_status_cmd(),
            interpreter: default_interpreter(),
            runner: None,
        }
    }
}

impl BatchConfig {
    /// The configured runner, or this executable's `run-task` subcommand
    pub fn runner_command(&self) -> WorkerResult<String> {
        match &self.runner {
            Some(runner) => Ok(runner.clone()),
            None => {
                let exe = env::current_exe().map_err(|e| {
                    WorkerError::Submission(format!("cannot locate the taskwright executable: {}", e))
                })?;
                Ok(format!("{} run-task", exe.display()))
            }
        }
    }
}

fn default_submit_cmd() -> Vec<String> {
    vec!["sbatch".to_string()]
}

fn default_status_cmd() -> Vec<String> {
    vec!["squeue".to_string()]
}

fn default_interpreter() -> String {
    "/bin/bash".to_string()
}

/// A task definition
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TaskConfig {
    /// How the command is invoked
    #[serde(default)]
    pub kind: InvocationBuilder,

    /// Usage description for help text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,

    /// Longer description for help text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Declared inputs, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Field>,

    /// Declared file outputs, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputDecl>,
}

impl TaskConfig {
    /// Declared inputs plus the base fields of the task's kind
    pub fn input_spec(&self) -> crate::error::SpecResult<TaskSpec> {
        self.kind.input_spec(self.inputs.clone())
    }

    pub fn output_fields(&self) -> Vec<Field> {
        self.outputs.iter().map(OutputDecl::to_field).collect()
    }

    pub fn output_spec(&self) -> crate::error::SpecResult<TaskSpec> {
        TaskSpec::new("Outputs", self.output_fields())
    }

    pub fn resolve(
        &self,
        name: &str,
        values: Inputs,
        output_root: &Path,
    ) -> crate::error::SpecResult<ResolvedTask> {
        let task = ResolvedTask::command(
            name,
            self.kind,
            self.inputs.clone(),
            self.output_fields(),
            values,
            output_root,
        )?;
        Ok(task.cached_under(output_root))
    }
}

/// A declared output file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OutputDecl {
    pub name: String,

    #[serde(rename = "type", default = "default_output_type")]
    pub field_type: FieldType,

    /// Path or glob relative to the output directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Path template rendered from the task's inputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_template: Option<String>,
}

fn default_output_type() -> FieldType {
    FieldType::File
}

impl OutputDecl {
    pub fn to_field(&self) -> Field {
        let mut field = Field::new(self.name.clone(), self.field_type);
        if let Some(path) = &self.path {
            field = field.with_default(Value::Str(path.clone()));
        }
        if let Some(template) = &self.output_file_template {
            field = field.with_output_template(template.clone());
        }
        field
    }
}

/// Custom deserializer for commands given either as one string or as a list
fn deserialize_command<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    match value {
        // "sbatch --parsable"
        Value::String(s) => Ok(s.split_whitespace().map(String::from).collect()),
        Value::Sequence(seq) => seq
            .into_iter()
            .map(|item| String::deserialize(item).map_err(D::Error::custom))
            .collect(),
        Value::Null => Ok(Vec::new()),
        _ => Err(D::Error::custom("command must be a string or array")),
    }
}
