use std::time::{Duration, SystemTime};

use hypo_core::execution::ProcessExitStatus;
use hypo_core::models::{CoreErrorKind, RunRecord, TaskRun, TaskSpec, TaskStatus};

#[test]
fn build_resolves_paths_and_creates_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("runs").join("a");

    let task = TaskSpec::new("train", "python train.py")
        .working_dir(dir.path())
        .output_dir(&output)
        .env("SEED", "3")
        .build()
        .unwrap();

    assert!(output.is_dir());
    assert!(task.output_dir().is_absolute());
    assert_eq!(task.working_dir(), dir.path());
    assert_eq!(task.env().get("SEED").map(String::as_str), Some("3"));
    assert!(task.resource().is_none());
}

#[test]
fn existing_output_directory_is_fine() {
    let dir = tempfile::tempdir().unwrap();
    TaskSpec::new("first", "true").output_dir(dir.path()).build().unwrap();
    TaskSpec::new("second", "true").output_dir(dir.path()).build().unwrap();
}

#[test]
fn invalid_specs_are_rejected() {
    let error = TaskSpec::new("blank", "   ").build().unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);

    let error = TaskSpec::new("instant", "true")
        .timeout(Duration::ZERO)
        .build()
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
}

#[test]
fn ids_are_unique() {
    let first = TaskSpec::new("a", "true").build().unwrap();
    let second = TaskSpec::new("a", "true").build().unwrap();
    assert_ne!(first.id(), second.id());
}

#[test]
fn finish_derives_status_from_exit() {
    let started_at = SystemTime::now();
    let run = |exit_status, failure: Option<&str>| TaskRun {
        worker: 1,
        device: Some(0),
        started_at,
        finished_at: started_at + Duration::from_secs(3),
        exit_status,
        failure: failure.map(str::to_string),
    };

    let ok = TaskSpec::new("ok", "true")
        .build()
        .unwrap()
        .finish(run(Some(ProcessExitStatus::ExitCode(0)), None));
    assert!(ok.succeeded());
    assert_eq!(ok.duration_ms(), 3000);

    let failed = TaskSpec::new("bad", "false")
        .build()
        .unwrap()
        .finish(run(Some(ProcessExitStatus::ExitCode(1)), Some("exit code: 1")));
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.exit_code(), Some(1));

    let killed = TaskSpec::new("killed", "sleep 9")
        .build()
        .unwrap()
        .finish(run(None, Some("process timed out after 100ms")));
    assert_eq!(killed.status, TaskStatus::Failed);
    assert_eq!(killed.exit_code(), None);

    let record = RunRecord::from(&killed);
    assert_eq!(record.time_consume, "0:00:03");
    assert_eq!(record.device, Some(0));
    assert_eq!(record.exit_code, None);
    assert_eq!(record.command, "sleep 9");
}
