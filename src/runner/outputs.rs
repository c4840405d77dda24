//! Collection of file outputs after a command has run

use crate::error::{RunError, RunResult};
use crate::runner::render_template;
use crate::spec::{Field, Inputs, TaskSpec, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Outputs every command task produces itself
pub const RETURN_CODE: &str = "return_code";
pub const STDOUT: &str = "stdout";
pub const STDERR: &str = "stderr";

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Resolve declared file outputs relative to `output_dir`
///
/// - output fields with an `output_file_template` yield the rendered path
/// - output fields with a default path yield that path, which must exist; a glob
///   pattern must match at least one file (one match → path, several → list)
/// - input fields with an `output_file_template` yield an output named
///   `output_field_name` (or the field's own name)
pub fn collect_outputs(
    output_spec: &TaskSpec,
    input_spec: &TaskSpec,
    inputs: &Inputs,
    output_dir: &Path,
) -> RunResult<BTreeMap<String, Value>> {
    let mut collected = BTreeMap::new();

    for field in output_spec.fields() {
        if matches!(field.name.as_str(), RETURN_CODE | STDOUT | STDERR) {
            continue;
        }
        if let Some(value) = templated_output(field, inputs, output_dir)? {
            collected.insert(output_name(field), value);
            continue;
        }
        let value = match field.default.as_ref().and_then(Value::as_str) {
            Some(pattern) => resolve_path(&field.name, pattern, output_dir)?,
            None => Value::Null,
        };
        collected.insert(field.name.clone(), value);
    }

    for field in input_spec.fields() {
        if let Some(value) = templated_output(field, inputs, output_dir)? {
            collected.insert(output_name(field), value);
        }
    }

    Ok(collected)
}

/// Declared file outputs of a command that failed, each bound to null
pub fn unfilled_outputs(output_spec: &TaskSpec, input_spec: &TaskSpec) -> BTreeMap<String, Value> {
    let declared = output_spec
        .fields()
        .iter()
        .filter(|field| !matches!(field.name.as_str(), RETURN_CODE | STDOUT | STDERR))
        .map(output_name);
    let templated = input_spec
        .fields()
        .iter()
        .filter(|field| field.metadata.output_file_template.is_some())
        .map(output_name);

    declared
        .chain(templated)
        .map(|name| (name, Value::Null))
        .collect()
}

fn output_name(field: &Field) -> String {
    field
        .metadata
        .output_field_name
        .clone()
        .unwrap_or_else(|| field.name.clone())
}

fn templated_output(field: &Field, inputs: &Inputs, output_dir: &Path) -> RunResult<Option<Value>> {
    match &field.metadata.output_file_template {
        Some(template) => {
            let rendered = render_template(template, inputs)?;
            let path = output_dir.join(rendered);
            Ok(Some(Value::Str(path.display().to_string())))
        }
        None => Ok(None),
    }
}

fn resolve_path(field: &str, pattern: &str, output_dir: &Path) -> RunResult<Value> {
    let full = output_dir.join(pattern);

    if !is_glob(pattern) {
        if full.exists() {
            return Ok(Value::Str(full.display().to_string()));
        }
        return Err(RunError::OutputNotFound {
            field: field.to_string(),
            path: full,
        });
    }

    let no_match = || RunError::NoOutputMatch {
        field: field.to_string(),
        pattern: pattern.to_string(),
    };
    let paths = glob::glob(&full.to_string_lossy()).map_err(|_| no_match())?;
    let mut matches: Vec<String> = paths
        .filter_map(Result::ok)
        .map(|p| p.display().to_string())
        .collect();
    matches.sort();

    match matches.len() {
        0 => Err(no_match()),
        1 => Ok(Value::Str(matches.remove(0))),
        _ => Ok(Value::List(matches.into_iter().map(Value::Str).collect())),
    }
}
