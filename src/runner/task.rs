//! Resolved tasks
//!
//! A `ResolvedTask` has every input bound, a content hash, and an output
//! directory. It is immutable once built; running it produces a `TaskResult`.

use crate::error::{ContainerResult, RunError, RunResult, SpecResult};
use crate::runner::{
    cmdline, collect_outputs, command_args, execute, lookup_function, unfilled_outputs,
    InvocationBuilder, RETURN_CODE, STDERR, STDOUT,
};
use crate::spec::{Field, Inputs, TaskSpec, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What a task runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskKind {
    /// A function from the process-wide registry
    Function { function: String },
    /// A shell or container command
    Command { builder: InvocationBuilder },
}

impl TaskKind {
    pub fn shell() -> Self {
        TaskKind::Command {
            builder: InvocationBuilder::Shell,
        }
    }

    pub fn command(builder: InvocationBuilder) -> Self {
        TaskKind::Command { builder }
    }
}

/// A task with all inputs bound, ready to run anywhere
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTask {
    name: String,
    kind: TaskKind,
    input_spec: TaskSpec,
    output_spec: TaskSpec,
    inputs: Inputs,
    output_dir: PathBuf,
    hash: String,
    #[serde(default)]
    strip: bool,
}

impl ResolvedTask {
    /// Bind `values` against `input_spec` and fix the task's identity
    pub fn new(
        name: impl Into<String>,
        kind: TaskKind,
        input_spec: TaskSpec,
        output_spec: TaskSpec,
        values: Inputs,
        output_dir: impl Into<PathBuf>,
    ) -> SpecResult<Self> {
        let inputs = input_spec.resolve(values)?;
        let hash = content_hash(&kind, &inputs);
        Ok(ResolvedTask {
            name: name.into(),
            kind,
            input_spec,
            output_spec,
            inputs,
            output_dir: output_dir.into(),
            hash,
            strip: false,
        })
    }

    /// A shell or container command task built from declared fields
    pub fn command(
        name: impl Into<String>,
        builder: InvocationBuilder,
        fields: Vec<Field>,
        outputs: Vec<Field>,
        values: Inputs,
        output_dir: impl Into<PathBuf>,
    ) -> SpecResult<Self> {
        let input_spec = builder.input_spec(fields)?;
        let output_spec = TaskSpec::new("Outputs", outputs)?;
        Self::new(
            name,
            TaskKind::command(builder),
            input_spec,
            output_spec,
            values,
            output_dir,
        )
    }

    /// A task calling the registered function `function`
    pub fn function(
        name: impl Into<String>,
        function: &str,
        values: Inputs,
        output_dir: impl Into<PathBuf>,
    ) -> RunResult<Self> {
        let registered =
            lookup_function(function).ok_or_else(|| RunError::UnknownFunction(function.to_string()))?;
        let task = Self::new(
            name,
            TaskKind::Function {
                function: function.to_string(),
            },
            registered.input_spec,
            registered.output_spec,
            values,
            output_dir,
        )?;
        Ok(task)
    }

    /// Trim whitespace from stdout/stderr
    pub fn with_strip(mut self, strip: bool) -> Self {
        self.strip = strip;
        self
    }

    /// Place the output directory under `root`, named after the job
    pub fn cached_under(mut self, root: &Path) -> Self {
        self.output_dir = root.join(self.job_name());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    pub fn input_spec(&self) -> &TaskSpec {
        &self.input_spec
    }

    pub fn output_spec(&self) -> &TaskSpec {
        &self.output_spec
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Content hash of the kind and bound inputs
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Name used for batch jobs: `<name>.<hash>`
    pub fn job_name(&self) -> String {
        format!("{}.{}", self.name, self.hash)
    }

    /// The command line without any container prefix
    pub fn command_args(&self) -> Vec<String> {
        command_args(&self.input_spec, &self.inputs)
    }

    /// The full invocation, including the container prefix if any
    ///
    /// Function tasks have no invocation.
    pub fn invocation(&self) -> ContainerResult<Vec<String>> {
        match &self.kind {
            TaskKind::Command { builder } => {
                builder.invocation(&self.input_spec, &self.inputs, &self.output_dir)
            }
            TaskKind::Function { .. } => Ok(Vec::new()),
        }
    }

    /// The invocation joined for display
    pub fn cmdline(&self) -> ContainerResult<String> {
        Ok(cmdline(&self.invocation()?))
    }

    /// Run the task in the current process
    pub fn run(&self) -> RunResult<TaskResult> {
        info!(task = %self.name, hash = %self.hash, "running task");
        let outputs = match &self.kind {
            TaskKind::Function { function } => {
                let registered = lookup_function(function)
                    .ok_or_else(|| RunError::UnknownFunction(function.clone()))?;
                registered.call(&self.inputs)?
            }
            TaskKind::Command { builder } => self.run_command(*builder)?,
        };
        debug!(task = %self.name, outputs = ?outputs.keys().collect::<Vec<_>>(), "task finished");

        Ok(TaskResult {
            name: self.name.clone(),
            outputs,
        })
    }

    fn run_command(&self, builder: InvocationBuilder) -> RunResult<BTreeMap<String, Value>> {
        let args = builder.invocation(&self.input_spec, &self.inputs, &self.output_dir)?;
        if args.is_empty() {
            return Err(RunError::EmptyCommand);
        }

        fs::create_dir_all(&self.output_dir)?;
        let result = execute(&args, &self.output_dir, self.strip)?;

        let mut outputs = if result.success() {
            collect_outputs(&self.output_spec, &self.input_spec, &self.inputs, &self.output_dir)?
        } else {
            debug!(task = %self.name, code = result.return_code, "command failed, skipping file outputs");
            unfilled_outputs(&self.output_spec, &self.input_spec)
        };
        outputs.insert(RETURN_CODE.to_string(), Value::Int(i64::from(result.return_code)));
        outputs.insert(STDOUT.to_string(), Value::Str(result.stdout));
        outputs.insert(STDERR.to_string(), Value::Str(result.stderr));
        Ok(outputs)
    }
}

/// blake3 over the JSON encoding of the kind and bound inputs
fn content_hash(kind: &TaskKind, inputs: &Inputs) -> String {
    let bytes = serde_json::to_vec(&(kind, inputs))
        .unwrap_or_else(|_| format!("{:?}{:?}", kind, inputs).into_bytes());
    blake3::hash(&bytes).to_hex().to_string()
}

/// Named outputs of a finished task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub name: String,
    pub outputs: BTreeMap<String, Value>,
}

impl TaskResult {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    pub fn return_code(&self) -> Option<i64> {
        self.get(RETURN_CODE).and_then(Value::as_int)
    }

    pub fn stdout(&self) -> Option<&str> {
        self.get(STDOUT).and_then(Value::as_str)
    }

    pub fn stderr(&self) -> Option<&str> {
        self.get(STDERR).and_then(Value::as_str)
    }
}
