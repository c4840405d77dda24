//! Integration tests for task assembly and execution

mod common;

use common::{create_test_config, values};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::time::Duration;
use taskwright::config::{parse_config_file, validate_config};
use taskwright::runner::{register_function, InvocationBuilder, ResolvedTask, Returned};
use taskwright::spec::{Field, FieldType, Inputs, Value};
use taskwright::worker::{
    create_worker, wait_all, FuturesWorker, JobHandle, JobOutcome, SerialWorker, Worker,
    WorkerKind,
};

#[test]
fn test_positions_sorted_with_args_last() {
    let dir = tempfile::tempdir().unwrap();
    let fields = vec![
        Field::new("third", FieldType::Str).at_position(3),
        Field::new("first", FieldType::Str).at_position(1),
        Field::new("second", FieldType::Str).at_position(2),
    ];
    let task = ResolvedTask::command(
        "order",
        InvocationBuilder::Shell,
        fields,
        vec![],
        values(&[
            ("executable", Value::from("cmd")),
            ("args", Value::from(vec!["a1", "a2"])),
            ("third", Value::from("p3")),
            ("first", Value::from("p1")),
            ("second", Value::from("p2")),
        ]),
        dir.path(),
    )
    .unwrap();

    assert_eq!(task.command_args(), vec!["cmd", "p1", "p2", "p3", "a1", "a2"]);
    assert_eq!(task.cmdline().unwrap(), "cmd p1 p2 p3 a1 a2");
}

#[test]
fn test_false_flag_truncates_command() {
    let dir = tempfile::tempdir().unwrap();
    let fields = vec![
        Field::new("flag_a", FieldType::Bool).with_argstr("-a"),
        Field::new("pos1", FieldType::Str).at_position(1),
    ];
    let task = ResolvedTask::command(
        "flags",
        InvocationBuilder::Shell,
        fields,
        vec![],
        values(&[
            ("executable", Value::from("ls")),
            ("flag_a", Value::Bool(false)),
            ("pos1", Value::from("dir")),
        ]),
        dir.path(),
    )
    .unwrap();

    assert_eq!(task.command_args(), vec!["ls"]);
}

#[test]
fn test_docker_invocation_from_config() {
    let (dir, path) = create_test_config(
        r#"
output_root: out
tasks:
  listing:
    kind: docker
    inputs:
      - name: executable
        default: ls
      - name: image
        default: busybox
      - name: bindings
        type: list
        default: ["/data:/in:ro"]
"#,
    );
    let config = parse_config_file(&path).unwrap();
    validate_config(&config).unwrap();

    let task = config.resolve_task("listing", Inputs::new()).unwrap();
    assert!(task.output_dir().starts_with(dir.path().join("out")));

    let expected = format!(
        "docker run busybox -v /data:/in:ro -v {}:/output_pydra:rw -w /output_pydra ls",
        task.output_dir().display()
    );
    assert_eq!(task.cmdline().unwrap(), expected);
}

#[test]
fn test_missing_image_is_reported_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let task = ResolvedTask::command(
        "noimage",
        InvocationBuilder::Docker,
        vec![],
        vec![],
        values(&[("executable", Value::from("ls"))]),
        dir.path(),
    )
    .unwrap();

    let err = task.invocation().unwrap_err();
    assert_eq!(err.to_string(), "Container image is not specified");

    let mut worker = SerialWorker::new();
    let handle = worker.submit(task).unwrap();
    let outcome = worker.take_outcome(&handle).unwrap().unwrap();
    assert!(matches!(outcome, JobOutcome::Failed(ref m) if m.contains("image")));
}

#[test]
fn test_shell_task_outputs_and_strip() {
    let (_dir, path) = create_test_config(
        r#"
output_root: out
strip: true
tasks:
  write:
    inputs:
      - name: executable
        default: [sh, -c]
      - name: args
        default: "echo written > result.txt; echo done"
    outputs:
      - name: result
        path: result.txt
"#,
    );
    let config = parse_config_file(&path).unwrap();
    let task = config.resolve_task("write", Inputs::new()).unwrap();
    let output_dir = task.output_dir().to_path_buf();

    let mut worker = SerialWorker::new();
    let handle = worker.submit(task).unwrap();
    let result = worker
        .take_outcome(&handle)
        .unwrap()
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(result.return_code(), Some(0));
    assert_eq!(result.stdout(), Some("done"));
    assert_eq!(result.stderr(), Some(""));
    let produced = output_dir.join("result.txt");
    assert_eq!(
        result.get("result"),
        Some(&Value::Str(produced.display().to_string()))
    );
    assert_eq!(fs::read_to_string(produced).unwrap(), "written\n");
}

#[test]
fn test_nonzero_return_code_is_an_output() {
    let dir = tempfile::tempdir().unwrap();
    let task = ResolvedTask::command(
        "fail",
        InvocationBuilder::Shell,
        vec![],
        vec![],
        values(&[
            ("executable", Value::from(vec!["sh", "-c"])),
            ("args", Value::from("echo oops >&2; exit 3")),
        ]),
        dir.path(),
    )
    .unwrap()
    .with_strip(true);

    let result = task.run().unwrap();
    assert_eq!(result.return_code(), Some(3));
    assert_eq!(result.stderr(), Some("oops"));
}

#[test]
fn test_function_outputs() {
    register_function(
        "integration_divmod",
        vec![
            Field::new("a", FieldType::Int).mandatory(),
            Field::new("b", FieldType::Int).mandatory(),
        ],
        vec!["quotient", "remainder"],
        |inputs| {
            let a = inputs.get("a").and_then(Value::as_int).unwrap_or(0);
            let b = inputs.get("b").and_then(Value::as_int).unwrap_or(1);
            if b == 0 {
                return Err("division by zero".to_string());
            }
            Ok(Returned::Tuple(vec![Value::Int(a / b), Value::Int(a % b)]))
        },
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let task = ResolvedTask::function(
        "divmod",
        "integration_divmod",
        values(&[("a", Value::Int(17)), ("b", Value::Int(5))]),
        dir.path(),
    )
    .unwrap();
    let result = task.run().unwrap();
    assert_eq!(result.get("quotient"), Some(&Value::Int(3)));
    assert_eq!(result.get("remainder"), Some(&Value::Int(2)));

    let zero = ResolvedTask::function(
        "divmod",
        "integration_divmod",
        values(&[("a", Value::Int(1)), ("b", Value::Int(0))]),
        dir.path(),
    )
    .unwrap();
    let err = zero.run().unwrap_err();
    assert!(err.to_string().contains("division by zero"));
}

#[test]
fn test_function_arity_mismatch() {
    register_function("integration_pair", vec![], vec!["only"], |_| {
        Ok(Returned::Tuple(vec![Value::Int(1), Value::Int(2)]))
    })
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let task = ResolvedTask::function("pair", "integration_pair", Inputs::new(), dir.path()).unwrap();
    let err = task.run().unwrap_err();
    assert!(err.to_string().contains("Expected 1 output values, but 2 were returned"));
}

#[test]
fn test_futures_worker_runs_concurrently() {
    let mut worker = FuturesWorker::new(3).unwrap();
    let mut dirs = Vec::new();
    let mut expected = HashMap::new();

    for i in 0..3 {
        let dir = tempfile::tempdir().unwrap();
        let task = ResolvedTask::command(
            format!("sleep{}", i),
            InvocationBuilder::Shell,
            vec![],
            vec![],
            values(&[
                ("executable", Value::from(vec!["sh", "-c"])),
                ("args", Value::from(format!("sleep 1; echo {}", i))),
            ]),
            dir.path(),
        )
        .unwrap()
        .with_strip(true);
        dirs.push(dir);
        expected.insert(worker.submit(task).unwrap(), i.to_string());
    }

    let handles: HashSet<JobHandle> = expected.keys().cloned().collect();
    let finished = wait_all(&mut worker, handles, Duration::from_millis(10)).unwrap();
    assert_eq!(finished.len(), 3);
    for (handle, outcome) in finished {
        let result = outcome.into_result().unwrap();
        assert_eq!(result.stdout(), Some(expected[&handle].as_str()));
    }
    worker.shutdown();
}

#[test]
fn test_every_local_worker_kind_runs_a_task() {
    let (_dir, path) = create_test_config(
        r#"
output_root: out
strip: true
worker:
  pool_size: 2
tasks:
  hello:
    inputs:
      - name: executable
        default: echo
      - name: args
        default: hi
"#,
    );
    let config = parse_config_file(&path).unwrap();

    for kind in [
        WorkerKind::Serial,
        WorkerKind::Pool,
        WorkerKind::Futures,
        WorkerKind::Cluster,
    ] {
        let mut worker_config = config.worker.clone();
        worker_config.kind = kind;
        let mut worker = create_worker(&worker_config).unwrap();

        let task = config.resolve_task("hello", Inputs::new()).unwrap();
        let handle = worker.submit(task).unwrap();
        let finished = wait_all(
            worker.as_mut(),
            HashSet::from([handle]),
            Duration::from_millis(10),
        )
        .unwrap();
        worker.shutdown();

        let (_, outcome) = finished.into_iter().next().unwrap();
        assert_eq!(outcome.into_result().unwrap().stdout(), Some("hi"), "{}", kind);
    }
}
