//! Container invocation building
//!
//! A task's invocation is chosen by an `InvocationBuilder` strategy. Container
//! flavours prefix the assembled command with the engine's `run` call, the
//! image, bind mounts and the working directory:
//!
//! `<engine> run [xargs...] <image> [-v|-B <local>:<container>:<mode>]... -w <workdir> <command...>`

use crate::error::{ContainerError, ContainerResult, SpecResult};
use crate::runner::command_args;
use crate::spec::{
    Field, Inputs, TaskSpec, Value, BINDINGS_FIELD, CONTAINER_FIELD, CONTAINER_XARGS_FIELD,
    IMAGE_FIELD,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Container-side path of the output directory when no binding targets it
pub const DEFAULT_OUTPUT_MOUNT: &str = "/output_pydra";

/// How a command task turns into a process invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationBuilder {
    /// Plain command, run directly
    #[default]
    Shell,
    /// Any engine; binds use `-v`
    Container,
    /// Engine must be `docker`; binds use `-v`
    Docker,
    /// Engine must be `singularity`; binds use `-B`
    Singularity,
}

impl InvocationBuilder {
    pub fn is_container(self) -> bool {
        !matches!(self, InvocationBuilder::Shell)
    }

    /// Flag that introduces one bind mount
    pub fn bind_flag(self) -> &'static str {
        match self {
            InvocationBuilder::Singularity => "-B",
            _ => "-v",
        }
    }

    /// Engine this flavour insists on, if any
    pub fn expected_engine(self) -> Option<&'static str> {
        match self {
            InvocationBuilder::Docker => Some("docker"),
            InvocationBuilder::Singularity => Some("singularity"),
            _ => None,
        }
    }

    /// Input spec for this flavour, with its base fields added
    pub fn input_spec(self, fields: Vec<Field>) -> SpecResult<TaskSpec> {
        match self {
            InvocationBuilder::Shell => TaskSpec::shell(fields),
            other => TaskSpec::container(fields, other.expected_engine()),
        }
    }

    /// Everything before the command: engine, run, xargs, image, binds, workdir
    pub fn container_args(self, inputs: &Inputs, output_dir: &Path) -> ContainerResult<Vec<String>> {
        if !self.is_container() {
            return Ok(Vec::new());
        }

        let engine = match inputs.get(CONTAINER_FIELD).and_then(Value::as_str) {
            Some(engine) if !engine.is_empty() => engine,
            _ => return Err(ContainerError::MissingContainerEngine),
        };
        if let Some(expected) = self.expected_engine() {
            if engine != expected {
                return Err(ContainerError::EngineMismatch {
                    expected: expected.to_string(),
                    found: engine.to_string(),
                });
            }
        }

        let mut cargs = vec![engine.to_string(), "run".to_string()];
        if let Some(xargs) = inputs.get(CONTAINER_XARGS_FIELD) {
            cargs.extend(xargs.to_tokens());
        }

        match inputs.get(IMAGE_FIELD).and_then(Value::as_str) {
            Some(image) if !image.is_empty() => cargs.push(image.to_string()),
            _ => return Err(ContainerError::MissingImage),
        }

        let bindings = parse_bindings(inputs.get(BINDINGS_FIELD).unwrap_or(&Value::Null))?;
        cargs.extend(bind_args(self.bind_flag(), &bindings, output_dir));
        Ok(cargs)
    }

    /// The complete invocation for a spec and its bound inputs
    pub fn invocation(
        self,
        spec: &TaskSpec,
        inputs: &Inputs,
        output_dir: &Path,
    ) -> ContainerResult<Vec<String>> {
        let mut args = self.container_args(inputs, output_dir)?;
        args.extend(command_args(spec, inputs));
        Ok(args)
    }
}

impl fmt::Display for InvocationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvocationBuilder::Shell => "shell",
            InvocationBuilder::Container => "container",
            InvocationBuilder::Docker => "docker",
            InvocationBuilder::Singularity => "singularity",
        };
        write!(f, "{}", name)
    }
}

/// Access mode of a bind mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BindMode {
    #[serde(rename = "ro")]
    ReadOnly,
    #[default]
    #[serde(rename = "rw")]
    ReadWrite,
}

impl BindMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BindMode::ReadOnly => "ro",
            BindMode::ReadWrite => "rw",
        }
    }
}

impl FromStr for BindMode {
    type Err = ContainerError;

    fn from_str(s: &str) -> ContainerResult<Self> {
        match s {
            "ro" => Ok(BindMode::ReadOnly),
            "rw" => Ok(BindMode::ReadWrite),
            other => Err(ContainerError::MalformedBinding(format!(
                "unsupported mode '{}', expected 'ro' or 'rw'",
                other
            ))),
        }
    }
}

/// A local path mounted into the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub local_path: PathBuf,
    pub container_path: String,
    pub mode: BindMode,
}

impl Binding {
    pub fn new(local_path: impl Into<PathBuf>, container_path: impl Into<String>, mode: BindMode) -> Self {
        Binding {
            local_path: local_path.into(),
            container_path: container_path.into(),
            mode,
        }
    }

    /// Parse a `(local, container[, mode])` tuple or a `local:container[:mode]` string
    pub fn from_value(value: &Value) -> ContainerResult<Self> {
        let parts: Vec<Value> = match value {
            Value::List(items) => items.clone(),
            Value::Str(s) => s.split(':').map(Value::from).collect(),
            other => {
                return Err(ContainerError::MalformedBinding(format!(
                    "expected a tuple or 'local:container[:mode]' string, got '{}'",
                    other
                )))
            }
        };

        let mode = match parts.len() {
            2 => BindMode::ReadWrite,
            3 => match &parts[2] {
                Value::Null => BindMode::ReadWrite,
                Value::Str(mode) => mode.parse()?,
                other => {
                    return Err(ContainerError::MalformedBinding(format!(
                        "unsupported mode '{}'",
                        other
                    )))
                }
            },
            n => {
                return Err(ContainerError::MalformedBinding(format!(
                    "binding should have length 2 or 3, it has {}",
                    n
                )))
            }
        };

        let local = parts[0].to_string();
        let container = parts[1].to_string();
        if local.is_empty() || container.is_empty() {
            return Err(ContainerError::MalformedBinding(
                "binding paths must not be empty".to_string(),
            ));
        }

        Ok(Binding::new(local, container, mode))
    }

    /// `local:container:mode`
    pub fn to_arg(&self) -> String {
        format!(
            "{}:{}:{}",
            self.local_path.display(),
            self.container_path,
            self.mode.as_str()
        )
    }
}

/// Parse the `bindings` input (null means no bindings)
pub fn parse_bindings(value: &Value) -> ContainerResult<Vec<Binding>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::List(items) => items.iter().map(Binding::from_value).collect(),
        other => Err(ContainerError::MalformedBinding(format!(
            "bindings must be a list, got '{}'",
            other
        ))),
    }
}

/// Add a read-write binding for `output_dir` unless one already targets it
///
/// Returns the full binding list and the container-side output path.
pub fn with_output_binding(bindings: &[Binding], output_dir: &Path) -> (Vec<Binding>, String) {
    let mut all = bindings.to_vec();
    let existing = bindings
        .iter()
        .find(|b| b.local_path == output_dir)
        .map(|b| b.container_path.clone());

    let workdir = match existing {
        Some(path) => path,
        None => {
            all.push(Binding::new(
                output_dir,
                DEFAULT_OUTPUT_MOUNT,
                BindMode::ReadWrite,
            ));
            DEFAULT_OUTPUT_MOUNT.to_string()
        }
    };
    (all, workdir)
}

/// Bind flags for every binding, followed by `-w <workdir>`
pub fn bind_args(flag: &str, bindings: &[Binding], output_dir: &Path) -> Vec<String> {
    let (all, workdir) = with_output_binding(bindings, output_dir);
    let mut bargs = Vec::with_capacity(all.len() * 2 + 2);
    for binding in &all {
        bargs.push(flag.to_string());
        bargs.push(binding.to_arg());
    }
    bargs.push("-w".to_string());
    bargs.push(workdir);
    bargs
}
