//! Command assembly and execution
//!
//! Turns a field spec plus bound inputs into an ordered argument vector, and
//! runs argument vectors as child processes.

use crate::error::{RunError, RunResult};
use crate::spec::{Inputs, TaskSpec, Value};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command as StdCommand, Stdio};
use tracing::{debug, info};

/// Position reserved for the `executable` field
pub const EXECUTABLE_POSITION: i64 = 0;

/// Position reserved for the trailing `args` field
pub const ARGS_POSITION: i64 = -1;

/// The tokens one field contributes, and where they go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandArgument {
    pub position: i64,
    pub tokens: Vec<String>,
}

/// Collect the contributing fields in command-line order
///
/// The scan stops at the first boolean field whose value is not literally
/// `true`; everything gathered up to that point is kept, nothing after it.
pub fn command_arguments(spec: &TaskSpec, inputs: &Inputs) -> Vec<CommandArgument> {
    let mut pos_args = Vec::new();

    for field in spec.fields() {
        let position = if field.is_executable() {
            EXECUTABLE_POSITION
        } else if field.is_args() {
            ARGS_POSITION
        } else if let Some(position) = field.position() {
            position
        } else {
            continue;
        };

        let value = inputs.get(&field.name).unwrap_or(&Value::Null);
        let mut tokens = Vec::new();

        if field.is_bool() {
            if !value.is_true() {
                debug!(field = %field.name, "non-true boolean flag, stopping argument scan");
                break;
            }
            if let Some(argstr) = &field.metadata.argument_template {
                tokens.push(argstr.clone());
            }
        } else {
            if value.is_null() {
                continue;
            }
            if let Some(argstr) = &field.metadata.argument_template {
                tokens.push(argstr.clone());
            }
            tokens.extend(value.to_tokens());
        }

        pos_args.push(CommandArgument { position, tokens });
    }

    // Stable sort, then the args group goes last
    pos_args.sort_by_key(|arg| arg.position);
    let (trailing, mut ordered): (Vec<_>, Vec<_>) = pos_args
        .into_iter()
        .partition(|arg| arg.position == ARGS_POSITION);
    ordered.extend(trailing);
    ordered
}

/// Build the flat argument vector for a spec and its bound inputs
pub fn command_args(spec: &TaskSpec, inputs: &Inputs) -> Vec<String> {
    command_arguments(spec, inputs)
        .into_iter()
        .flat_map(|arg| arg.tokens)
        .collect()
}

/// Join an argument vector for display
pub fn cmdline(args: &[String]) -> String {
    args.join(" ")
}

/// The three outputs every shell or container task produces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellOutputs {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutputs {
    pub fn success(&self) -> bool {
        self.return_code == 0
    }
}

/// Run an argument vector as a child process
///
/// A non-zero exit is reported through `return_code`, not as an error.
/// Only a process that cannot be started at all fails.
pub fn execute(args: &[String], working_dir: &Path, strip: bool) -> RunResult<ShellOutputs> {
    let (program, rest) = args.split_first().ok_or(RunError::EmptyCommand)?;

    info!(command = %cmdline(args), dir = %working_dir.display(), "running command");

    let output = StdCommand::new(program)
        .args(rest)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| RunError::Spawn {
            program: program.clone(),
            source,
        })?;

    let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if strip {
        stdout = stdout.trim().to_string();
        stderr = stderr.trim().to_string();
    }

    // Killed by a signal: no exit code
    let return_code = output.status.code().unwrap_or(-1);
    debug!(program = %program, return_code, "command finished");

    Ok(ShellOutputs {
        return_code,
        stdout,
        stderr,
    })
}
