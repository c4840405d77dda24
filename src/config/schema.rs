//! Configuration validation
//!
//! This module turns every task declaration into its input and output
//! specifications so that malformed fields are reported when the config is
//! loaded rather than when a task runs.

use crate::config::types::{Config, TaskConfig};
use crate::error::{ConfigError, ConfigResult};
use crate::runner::{RETURN_CODE, STDERR, STDOUT};
use regex::Regex;
use std::sync::OnceLock;

/// Names taken by global and `run` options; input fields may not use them
pub const RESERVED_ARG_NAMES: &[&str] =
    &["config", "quiet", "verbose", "worker", "jobs", "help", "version"];

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

/// Validate a complete configuration
pub fn validate_config(config: &Config) -> ConfigResult<()> {
    for (name, task) in &config.tasks {
        validate_task(name, task)?;
    }

    if config.worker.batch.submit_cmd.is_empty() {
        return Err(ConfigError::Invalid("worker.batch.submit_cmd is empty".to_string()));
    }
    if config.worker.batch.status_cmd.is_empty() {
        return Err(ConfigError::Invalid("worker.batch.status_cmd is empty".to_string()));
    }
    if config.worker.pool_size == Some(0) {
        return Err(ConfigError::Invalid("worker.pool_size must be at least 1".to_string()));
    }

    Ok(())
}

/// Validate a single task
pub fn validate_task(name: &str, task: &TaskConfig) -> ConfigResult<()> {
    if name.is_empty() || name.starts_with('-') || name.contains(char::is_whitespace) {
        return Err(ConfigError::Invalid(format!("Invalid task name: '{}'", name)));
    }

    // field names become command-line flags and template placeholders
    for field in &task.inputs {
        if !identifier_regex().is_match(&field.name) {
            return Err(ConfigError::Invalid(format!(
                "Task '{}': invalid input name '{}'",
                name, field.name
            )));
        }
        if RESERVED_ARG_NAMES.contains(&field.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Task '{}': input name '{}' is reserved for a command-line option",
                name, field.name
            )));
        }
    }

    for output in &task.outputs {
        if matches!(output.name.as_str(), RETURN_CODE | STDOUT | STDERR) {
            return Err(ConfigError::Invalid(format!(
                "Task '{}': output name '{}' is reserved",
                name, output.name
            )));
        }
        if output.path.is_none() && output.output_file_template.is_none() {
            return Err(ConfigError::Invalid(format!(
                "Task '{}': output '{}' needs a path or an output_file_template",
                name, output.name
            )));
        }
    }

    let to_config_error = |source| ConfigError::TaskSpec {
        task: name.to_string(),
        source,
    };
    task.input_spec().map_err(to_config_error)?;
    task.output_spec().map_err(to_config_error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::error::SpecError;

    fn load(yaml: &str) -> Config {
        parse_config(yaml, None).unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        let config = load(
            r#"
tasks:
  cat:
    inputs:
      - name: executable
        default: cat
      - name: file
        type: file
        position: 1
        mandatory: true
    outputs:
      - name: log
        path: "*.log"
"#,
        );
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_rejects_position_zero() {
        let config = load(
            r#"
tasks:
  bad:
    inputs:
      - name: opt
        position: 0
"#,
        );
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TaskSpec {
                source: SpecError::InvalidFieldMetadata { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_mandatory_default() {
        let config = load(
            r#"
tasks:
  bad:
    inputs:
      - name: opt
        mandatory: true
        default: 3
"#,
        );
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::TaskSpec {
                source: SpecError::ConflictingDefault { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_reserved_field() {
        let config = load(
            r#"
tasks:
  bad:
    inputs:
      - name: executable
        default: ls
      - name: executable
        default: cat
"#,
        );
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::TaskSpec {
                source: SpecError::DuplicateReservedField(_),
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_input_name() {
        let config = load(
            r#"
tasks:
  bad:
    inputs:
      - name: "two words"
"#,
        );
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_rejects_reserved_input() {
        let config = load(
            r#"
tasks:
  bad:
    inputs:
      - name: worker
"#,
        );
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_rejects_reserved_output() {
        let config = load(
            r#"
tasks:
  bad:
    outputs:
      - name: stdout
        path: out.txt
"#,
        );
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_rejects_output_without_path() {
        let config = load(
            r#"
tasks:
  bad:
    outputs:
      - name: result
"#,
        );
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_xor_target() {
        let config = load(
            r#"
tasks:
  bad:
    inputs:
      - name: a
        type: bool
        xor: [missing]
"#,
        );
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::TaskSpec { .. })
        ));
    }
}
