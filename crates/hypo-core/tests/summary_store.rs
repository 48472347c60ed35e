use std::time::{Duration, SystemTime};

use hypo_core::execution::ProcessExitStatus;
use hypo_core::models::{
    CoreErrorKind, ExperimentMeta, TaskResult, TaskRun, TaskSpec, TaskStatus,
};
use hypo_core::persistence::{SummaryStore, SummaryWriter};
use serde_json::Value;

fn result(name: &str, exit: i32, output: &std::path::Path) -> TaskResult {
    let task = TaskSpec::new(name, format!("exit {exit}"))
        .output_dir(output)
        .build()
        .unwrap();
    let started_at = SystemTime::now();
    task.finish(TaskRun {
        worker: 0,
        device: Some(1),
        started_at,
        finished_at: started_at + Duration::from_millis(1500),
        exit_status: Some(ProcessExitStatus::ExitCode(exit)),
        failure: (exit != 0).then(|| format!("exit code: {exit}")),
    })
}

fn meta(experiment: &str) -> ExperimentMeta {
    let started_at = SystemTime::now();
    ExperimentMeta {
        experiment: experiment.to_string(),
        started_at,
        finished_at: started_at + Duration::from_secs(2),
    }
}

fn read_array(path: &std::path::Path) -> Vec<Value> {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn flushes_accumulate_in_one_array() {
    let dir = tempfile::tempdir().unwrap();
    let writer = SummaryWriter::new(dir.path().join("nested").join("summary.json"));

    writer
        .flush(&[result("train", 0, dir.path())], &meta("first"))
        .unwrap();
    let first_entry = read_array(writer.path())[0].clone();

    writer
        .flush(
            &[result("eval", 0, dir.path()), result("crash", 2, dir.path())],
            &meta("second"),
        )
        .unwrap();

    assert_eq!(read_array(writer.path())[0], first_entry);

    let summaries = writer.load().unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].experiment, "first");
    assert_eq!(summaries[1].experiment, "second");
    assert_eq!(summaries[1].runs.len(), 2);
    assert_eq!(summaries[1].runs[1].status, TaskStatus::Failed);
    assert_eq!(summaries[1].runs[1].exit_code, Some(2));
    assert_eq!(summaries[0].time, "2.00");
    assert_eq!(summaries[0].runs[0].time_consume, "0:00:01.500000");
}

#[test]
fn file_layout_uses_expected_keys_and_indent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("summary.json");
    let writer = SummaryWriter::new(&path);
    writer
        .flush(&[result("train", 0, dir.path())], &meta("layout"))
        .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("[\n    {"));

    let parsed: Value = serde_json::from_str(&text).unwrap();
    let entry = &parsed[0];
    assert_eq!(entry["Experiment"], "layout");
    for key in ["time", "start", "end", "runs"] {
        assert!(entry.get(key).is_some(), "missing key {key}");
    }
    let run = &entry["runs"][0];
    for key in [
        "name",
        "command",
        "cwd",
        "output",
        "datetime",
        "time_consume",
        "start_at",
        "finish_at",
    ] {
        assert!(run.get(key).is_some(), "missing run key {key}");
    }
    assert!(run.get("resource").is_none());

    let start = entry["start"].as_str().unwrap();
    assert_eq!(start.len(), "2024-01-01__00-00-00".len());
    assert_eq!(&start[10..12], "__");
}

#[test]
fn corrupt_file_is_left_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("summary.json");
    std::fs::write(&path, "{ not an array").unwrap();

    let error = SummaryWriter::new(&path)
        .flush(&[result("train", 0, dir.path())], &meta("lost"))
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::SummaryCorruption);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not an array");
}

#[test]
fn foreign_entries_are_preserved_on_append() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("summary.json");
    std::fs::write(&path, r#"[{"note": "written by hand"}]"#).unwrap();

    let writer = SummaryWriter::new(&path);
    writer.flush(&[], &meta("empty")).unwrap();

    let parsed: Vec<Value> =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0]["note"], "written by hand");
    assert_eq!(parsed[1]["runs"], Value::Array(Vec::new()));

    let error = writer.load().unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::SummaryCorruption);
}

#[test]
fn blank_file_counts_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("summary.json");
    std::fs::write(&path, "\n  \n").unwrap();

    let writer = SummaryWriter::new(&path);
    assert!(writer.load().unwrap().is_empty());
    writer.flush(&[], &meta("fresh")).unwrap();
    assert_eq!(writer.load().unwrap().len(), 1);
}

#[test]
fn concurrent_flushes_lose_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("summary.json");

    std::thread::scope(|scope| {
        for index in 0..6 {
            let path = path.clone();
            scope.spawn(move || {
                SummaryWriter::new(path)
                    .flush(&[], &meta(&format!("parallel-{index}")))
                    .unwrap();
            });
        }
    });

    assert_eq!(SummaryWriter::new(&path).load().unwrap().len(), 6);
}
