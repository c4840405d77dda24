//! Main CLI application

use crate::config::{
    load_dotenv, parse_config_auto, parse_config_file, validate_config, Config, TaskConfig,
};
use crate::error::{is_submission_error, ConfigError, Result, TaskwrightError};
use crate::runner::{run_serialized, TaskResult, RETURN_CODE, STDERR, STDOUT};
use crate::spec::{Field, FieldType, Inputs, Value};
use crate::worker::{create_worker, wait_all, JobOutcome, WorkerKind};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use clap_complete::Shell;
use colored::Colorize;
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Subcommands that work without a configuration file
const STANDALONE_COMMANDS: &[&str] = &["run-task", "completions"];

/// How much is logged to stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    fn filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

/// CLI application
pub struct App {
    /// Parsed configuration
    config: Config,
    /// Config file path, if one was loaded
    config_path: Option<PathBuf>,
}

impl App {
    /// Create a new app from the discovered configuration file
    pub fn new() -> Result<Self> {
        let (config, config_path) = parse_config_auto()?;
        Self::from_config(config, Some(config_path))
    }

    /// Create app with a specific config file
    pub fn with_config_file(path: PathBuf) -> Result<Self> {
        let config = parse_config_file(&path)?;
        Self::from_config(config, Some(path))
    }

    /// App without a configuration; only standalone commands work
    pub fn standalone() -> Self {
        App {
            config: Config::default(),
            config_path: None,
        }
    }

    fn from_config(config: Config, config_path: Option<PathBuf>) -> Result<Self> {
        validate_config(&config)?;
        Ok(App {
            config,
            config_path,
        })
    }

    /// The clap command for this configuration
    pub fn command(&self) -> Command {
        build_command(&self.config)
    }

    /// Run the application; returns the process exit code
    pub fn run(self, args: Vec<String>) -> Result<i32> {
        let mut command = self.command();
        let matches = command.clone().get_matches_from(args);

        init_tracing(get_verbosity(&matches));
        if let Some(path) = &self.config_path {
            debug!(path = %path.display(), "using config file");
            load_dotenv(path);
        }

        match matches.subcommand() {
            Some(("list", _)) => {
                self.list_tasks();
                Ok(0)
            }
            Some(("cmdline", sub)) => {
                let (name, task_matches) = task_subcommand(sub)?;
                let values = parse_field_values(self.config.task(name)?, task_matches)?;
                let task = self.config.resolve_task(name, values)?;
                println!("{}", task.cmdline()?);
                Ok(0)
            }
            Some(("run", sub)) => self.run_task(sub),
            Some(("run-task", sub)) => {
                let path = sub
                    .get_one::<PathBuf>("path")
                    .ok_or_else(|| ConfigError::Invalid("missing task file".to_string()))?;
                Ok(print_outcome(run_serialized(path)?))
            }
            Some(("completions", sub)) => {
                let shell = sub
                    .get_one::<Shell>("shell")
                    .copied()
                    .ok_or_else(|| ConfigError::Invalid("missing shell".to_string()))?;
                let bin_name = command.get_name().to_string();
                clap_complete::generate(shell, &mut command, bin_name, &mut io::stdout());
                Ok(0)
            }
            _ => {
                command.print_help()?;
                println!();
                Ok(0)
            }
        }
    }

    fn list_tasks(&self) {
        if self.config.tasks.is_empty() {
            println!("No tasks defined");
            return;
        }
        let width = self.config.tasks.keys().map(String::len).max().unwrap_or(0);
        for (name, task) in &self.config.tasks {
            let usage = task.usage.clone().unwrap_or_default();
            println!(
                "  {}  {}  {}",
                format!("{:<width$}", name, width = width).green().bold(),
                format!("{:<11}", task.kind.to_string()).dimmed(),
                usage
            );
        }
    }

    fn run_task(&self, sub: &ArgMatches) -> Result<i32> {
        let (name, task_matches) = task_subcommand(sub)?;
        let values = parse_field_values(self.config.task(name)?, task_matches)?;
        let task = self.config.resolve_task(name, values)?;

        let mut worker_config = self.config.worker.clone();
        if let Some(kind) = task_matches.get_one::<WorkerKind>("worker") {
            worker_config.kind = *kind;
        }
        if let Some(jobs) = task_matches.get_one::<usize>("jobs") {
            worker_config.pool_size = Some(*jobs);
        }

        let mut worker = create_worker(&worker_config)?;
        let handle = worker.submit(task).map_err(|e| {
            if is_submission_error(&e) {
                warn!(worker = worker.name(), "the backend rejected the task");
            }
            e
        })?;
        let finished = wait_all(
            worker.as_mut(),
            HashSet::from([handle]),
            worker_config.poll_interval(),
        );
        worker.shutdown();

        let mut code = 0;
        for (_, outcome) in finished? {
            code = code.max(print_outcome(outcome));
        }
        Ok(code)
    }
}

/// Print a job outcome and return the matching exit code
fn print_outcome(outcome: JobOutcome) -> i32 {
    match outcome {
        JobOutcome::Completed(result) => {
            print_result(&result);
            match result.return_code() {
                Some(code) if code != 0 => i32::try_from(code).unwrap_or(1),
                _ => 0,
            }
        }
        JobOutcome::Failed(message) => {
            eprintln!("{} {}", "Task failed:".red().bold(), message);
            1
        }
    }
}

fn print_result(result: &TaskResult) {
    if let Some(stdout) = result.stdout() {
        print!("{}", stdout);
        if !stdout.is_empty() && !stdout.ends_with('\n') {
            println!();
        }
    }
    if let Some(stderr) = result.stderr() {
        eprint!("{}", stderr);
    }
    for (name, value) in &result.outputs {
        if matches!(name.as_str(), RETURN_CODE | STDOUT | STDERR) {
            continue;
        }
        println!("{} {}", format!("{}:", name).cyan(), value);
    }
}

fn task_subcommand(matches: &ArgMatches) -> Result<(&str, &ArgMatches)> {
    matches
        .subcommand()
        .ok_or_else(|| TaskwrightError::Config(ConfigError::Invalid("no task given".to_string())))
}

/// Initialise the tracing subscriber; `RUST_LOG` overrides the verbosity flags
fn init_tracing(verbosity: Verbosity) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::new(verbosity.filter()),
    };
    // a subscriber may already be installed when embedded
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Build the clap command from configuration
fn build_command(config: &Config) -> Command {
    let mut cmdline = Command::new("cmdline")
        .about("Print the command line a task would run")
        .subcommand_required(true);
    let mut run = Command::new("run")
        .about("Run a task")
        .subcommand_required(true);

    for (task_name, task) in &config.tasks {
        let fields = task_fields(task);
        cmdline = cmdline.subcommand(task_command(task_name, task, &fields));
        run = run.subcommand(
            task_command(task_name, task, &fields)
                .arg(
                    Arg::new("worker")
                        .long("worker")
                        .value_name("KIND")
                        .help(format!("Worker backend ({})", WorkerKind::ALL.join(", ")))
                        .value_parser(|s: &str| s.parse::<WorkerKind>()),
                )
                .arg(
                    Arg::new("jobs")
                        .short('j')
                        .long("jobs")
                        .value_name("N")
                        .help("Number of pool threads")
                        .value_parser(value_parser!(usize)),
                ),
        );
    }

    Command::new(config.name.clone().unwrap_or_else(|| "taskwright".to_string()))
        .version(env!("CARGO_PKG_VERSION"))
        .about(config.usage.clone().unwrap_or_else(|| {
            "Run declared command-line and container tasks on pluggable workers".to_string()
        }))
        .arg(
            Arg::new("config")
                .short('f')
                .long("config")
                .value_name("FILE")
                .help("Path to taskwright.yml config file")
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only log warnings and errors")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log debug output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(Command::new("list").about("List configured tasks"))
        .subcommand(cmdline)
        .subcommand(run)
        .subcommand(
            Command::new("run-task")
                .about("Run a serialized task file")
                .hide(true)
                .arg(
                    Arg::new("path")
                        .value_name("PATH")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(
                    Arg::new("shell")
                        .value_name("SHELL")
                        .required(true)
                        .value_parser(value_parser!(Shell)),
                ),
        )
}

/// Every input a task accepts, base fields included
fn task_fields(task: &TaskConfig) -> Vec<Field> {
    task.input_spec()
        .map(|spec| spec.fields().to_vec())
        .unwrap_or_else(|_| task.inputs.clone())
}

fn task_command(task_name: &str, task: &TaskConfig, fields: &[Field]) -> Command {
    let mut task_cmd = Command::new(task_name.to_string()).about(task.usage.clone().unwrap_or_default());

    if let Some(desc) = &task.description {
        task_cmd = task_cmd.long_about(desc.clone());
    }

    for field in fields {
        task_cmd = task_cmd.arg(field_arg(field));
    }
    task_cmd
}

fn field_arg(field: &Field) -> Arg {
    let mut arg = Arg::new(field.name.clone())
        .long(field.name.clone())
        .help(field.metadata.help.clone());

    arg = match field.field_type {
        FieldType::Bool => arg.action(ArgAction::SetTrue),
        FieldType::List | FieldType::Any => arg
            .value_name(field.name.to_uppercase())
            .allow_hyphen_values(true)
            .action(ArgAction::Append),
        _ => arg
            .value_name(field.name.to_uppercase())
            .action(ArgAction::Set),
    };

    if field.metadata.mandatory && field.metadata.xor.is_empty() && field.default.is_none() {
        arg = arg.required(true);
    }
    arg
}

/// Get verbosity level from matches
fn get_verbosity(matches: &ArgMatches) -> Verbosity {
    if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else if matches.get_flag("verbose") {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    }
}

/// Collect the values given for a task's fields on the command line
fn parse_field_values(task: &TaskConfig, matches: &ArgMatches) -> Result<Inputs> {
    let mut values = Inputs::new();

    for field in task_fields(task) {
        let name = field.name.as_str();
        if field.is_bool() {
            if matches.get_flag(name) {
                values.insert(field.name.clone(), Value::Bool(true));
            }
            continue;
        }

        let raw: Vec<&String> = match matches.get_many::<String>(name) {
            Some(given) => given.collect(),
            None => continue,
        };
        let value = match (field.field_type, raw.as_slice()) {
            (FieldType::List, _) => Value::List(raw.iter().map(|s| Value::from(s.as_str())).collect()),
            (FieldType::Any, [single]) => Value::from(single.as_str()),
            (FieldType::Any, _) => Value::List(raw.iter().map(|s| Value::from(s.as_str())).collect()),
            (field_type, [.., last]) => coerce(name, field_type, last)?,
            (_, []) => continue,
        };
        values.insert(field.name.clone(), value);
    }

    Ok(values)
}

/// Convert a command-line string to a value of the field's type
pub fn coerce(name: &str, field_type: FieldType, raw: &str) -> Result<Value> {
    let invalid = |error: String| {
        TaskwrightError::Config(ConfigError::InvalidValue {
            name: name.to_string(),
            error,
        })
    };
    match field_type {
        FieldType::Int => raw
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| invalid(e.to_string())),
        FieldType::Float => raw
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| invalid(e.to_string())),
        FieldType::Bool => match raw {
            "true" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "0" => Ok(Value::Bool(false)),
            other => Err(invalid(format!("'{}' is not a boolean", other))),
        },
        _ => Ok(Value::from(raw)),
    }
}

/// Run the CLI application with the process arguments
pub fn run() -> Result<i32> {
    run_from(std::env::args().collect())
}

/// Run the CLI application with provided arguments
pub fn run_from(args: Vec<String>) -> Result<i32> {
    let app = match extract_file_arg(&args) {
        Some(path) => App::with_config_file(path)?,
        None => match App::new() {
            Ok(app) => app,
            Err(TaskwrightError::Config(ConfigError::NotFound(_))) if is_standalone(&args) => {
                App::standalone()
            }
            Err(e) => return Err(e),
        },
    };

    app.run(args)
}

fn is_standalone(args: &[String]) -> bool {
    args.iter()
        .skip(1)
        .find(|arg| !arg.starts_with('-'))
        .map_or(false, |arg| STANDALONE_COMMANDS.contains(&arg.as_str()))
}

/// Extract --config argument before clap parsing
fn extract_file_arg(args: &[String]) -> Option<PathBuf> {
    for i in 0..args.len() {
        if let Some(path) = args[i].strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
        if (args[i] == "--config" || args[i] == "-f") && i + 1 < args.len() {
            return Some(PathBuf::from(&args[i + 1]));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn config() -> Config {
        parse_config(
            r#"
tasks:
  greet:
    usage: Say hello
    inputs:
      - name: executable
        default: echo
      - name: loud
        type: bool
        argstr: -e
        position: 1
      - name: count
        type: int
        argstr: -n
      - name: files
        type: list
"#,
            None,
        )
        .unwrap()
    }

    fn task_matches(args: &[&str]) -> ArgMatches {
        let command = build_command(&config());
        let matches = command.get_matches_from(args.iter().copied());
        let (_, run) = matches.subcommand().unwrap();
        let (_, task) = run.subcommand().unwrap();
        task.clone()
    }

    #[test]
    fn test_get_verbosity() {
        let command = build_command(&Config::default());
        let matches = command.clone().get_matches_from(["taskwright", "list"]);
        assert_eq!(get_verbosity(&matches), Verbosity::Normal);
        let matches = command.get_matches_from(["taskwright", "-v", "list"]);
        assert_eq!(get_verbosity(&matches), Verbosity::Verbose);
    }

    #[test]
    fn test_parse_field_values() {
        let config = config();
        let matches = task_matches(&[
            "taskwright", "run", "greet", "--loud", "--count", "3", "--files", "a", "--files", "b",
        ]);
        let values = parse_field_values(config.task("greet").unwrap(), &matches).unwrap();

        assert_eq!(values["loud"], Value::Bool(true));
        assert_eq!(values["count"], Value::Int(3));
        assert_eq!(values["files"], Value::from(vec!["a", "b"]));
        assert!(!values.contains_key("executable"));
    }

    #[test]
    fn test_parse_field_values_rejects_bad_int() {
        let config = config();
        let matches = task_matches(&["taskwright", "run", "greet", "--count", "many"]);
        let err = parse_field_values(config.task("greet").unwrap(), &matches).unwrap_err();
        assert!(matches!(
            err,
            TaskwrightError::Config(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_worker_override_is_parsed() {
        let matches = task_matches(&["taskwright", "run", "greet", "--worker", "futures", "-j", "2"]);
        assert_eq!(
            matches.get_one::<WorkerKind>("worker"),
            Some(&WorkerKind::Futures)
        );
        assert_eq!(matches.get_one::<usize>("jobs"), Some(&2));
    }

    #[test]
    fn test_coerce() {
        assert_eq!(coerce("x", FieldType::Float, "1.5").unwrap(), Value::Float(1.5));
        assert_eq!(coerce("x", FieldType::File, "a.txt").unwrap(), Value::from("a.txt"));
        assert!(coerce("x", FieldType::Bool, "maybe").is_err());
    }

    #[test]
    fn test_extract_file_arg() {
        let args: Vec<String> = ["taskwright", "--config", "test.yml"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(extract_file_arg(&args), Some(PathBuf::from("test.yml")));

        let args: Vec<String> = ["taskwright", "-f", "other.yml", "list"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(extract_file_arg(&args), Some(PathBuf::from("other.yml")));
    }

    #[test]
    fn test_is_standalone() {
        let args = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(is_standalone(&args(&["taskwright", "-v", "run-task", "x.json"])));
        assert!(is_standalone(&args(&["taskwright", "completions", "bash"])));
        assert!(!is_standalone(&args(&["taskwright", "list"])));
    }
}
