//! Error types for Taskwright

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Taskwright operations
pub type Result<T> = std::result::Result<T, TaskwrightError>;

/// Main error type for Taskwright
#[derive(Error, Debug)]
pub enum TaskwrightError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Task specification errors
    #[error("Specification error: {0}")]
    Spec(#[from] SpecError),

    /// Container invocation errors
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    /// Task execution errors
    #[error("Execution error: {0}")]
    Run(#[from] RunError),

    /// Worker dispatch errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration parsing and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config file (searched: {0})")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Task '{0}' is not defined")]
    TaskNotFound(String),

    #[error("Invalid value for '{name}': {error}")]
    InvalidValue { name: String, error: String },

    #[error("Task '{task}': {source}")]
    TaskSpec {
        task: String,
        #[source]
        source: SpecError,
    },
}

/// Errors detected while building or binding a task specification
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    #[error("Invalid metadata for field '{field}': {reason}")]
    InvalidFieldMetadata { field: String, reason: String },

    #[error("Field '{0}' is declared more than once")]
    DuplicateField(String),

    #[error("Only one field may be named '{0}'")]
    DuplicateReservedField(String),

    #[error("Input '{0}' is not declared in the task specification")]
    UnknownInput(String),

    #[error("Field '{0}' is mandatory, but no value was provided")]
    MissingMandatory(String),

    #[error("Field '{field}' is mutually exclusive with '{other}'")]
    MutuallyExclusive { field: String, other: String },

    #[error("Field '{field}' requires '{required}' to be set")]
    MissingRequirement { field: String, required: String },

    #[error("Field '{field}': {reason}")]
    ConflictingDefault { field: String, reason: String },
}

/// Errors building a container invocation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContainerError {
    #[error("Container software is not specified")]
    MissingContainerEngine,

    #[error("Container image is not specified")]
    MissingImage,

    #[error("Malformed binding: {0}")]
    MalformedBinding(String),

    #[error("Expected container engine '{expected}', found '{found}'")]
    EngineMismatch { expected: String, found: String },
}

/// Template rendering errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("Template refers to undefined field '{0}'")]
    UndefinedField(String),
}

/// Errors raised while running a resolved task
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Expected {expected} output values, but {returned} were returned")]
    OutputArityMismatch { expected: usize, returned: usize },

    #[error("Function '{0}' is not registered")]
    UnknownFunction(String),

    #[error("Function '{function}' failed: {message}")]
    FunctionFailed { function: String, message: String },

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Output '{field}': file {} does not exist", .path.display())]
    OutputNotFound { field: String, path: PathBuf },

    #[error("Output '{field}': no file matches '{pattern}'")]
    NoOutputMatch { field: String, pattern: String },

    #[error("Task has no command to run")]
    EmptyCommand,

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Worker dispatch errors
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("Status query failed: {0}")]
    StatusQuery(String),

    #[error("Handle {0} was not issued by this worker")]
    UnknownHandle(String),

    #[error("Worker has been shut down")]
    ShutDown,

    #[error("Failed to serialize task: {0}")]
    Serialize(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for specification operations
pub type SpecResult<T> = std::result::Result<T, SpecError>;

/// Specialized result type for container invocation building
pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

/// Specialized result type for template rendering
pub type TemplateResult<T> = std::result::Result<T, TemplateError>;

/// Specialized result type for task execution
pub type RunResult<T> = std::result::Result<T, RunError>;

/// Specialized result type for worker operations
pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

/// Helper function to determine if a submission was rejected by the backend
/// (as opposed to a local I/O or serialization problem)
pub fn is_submission_error(err: &WorkerError) -> bool {
    matches!(err, WorkerError::Submission(_))
}
