use std::sync::Arc;
use std::time::Duration;

use hypo_core::models::{CoreErrorKind, Subsystem};
use hypo_core::orchestration::BacklogItem;
use hypo_core::plan::{PlanBuilder, PlanFile, PlanFormat};

const YAML_PLAN: &str = r#"
workers: 2
devices: [0, 1]
device_env_var: HYPO_DEVICE
env:
  SEED: "1"
resources: [git]
runs:
  - name: checkout
    command: git checkout main
    resource: git
  - batch:
      - name: train
        command: python train.py
        cwd: work
        output: out/train
        env:
          SEED: "7"
      - name: eval
        command: python eval.py
        output: out/eval
        timeout_secs: 1.5
"#;

#[test]
fn yaml_plan_builds_tasks_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let plan_path = dir.path().join("sweep.yaml");
    std::fs::write(&plan_path, YAML_PLAN).unwrap();

    let file = PlanFile::from_path(&plan_path).unwrap();
    assert_eq!(file.config.experiment_name(), "sweep");
    assert_eq!(file.config.workers, Some(2));
    assert_eq!(file.task_count(), 3);

    let plan = file.into_plan().unwrap();
    assert_eq!(plan.task_count(), 3);
    assert_eq!(plan.items.len(), 2);
    assert_eq!(plan.config.device_env_var, "HYPO_DEVICE");

    let BacklogItem::Task(checkout) = &plan.items[0] else {
        panic!("first entry should be a single task");
    };
    let git = plan.resources.get("git").unwrap();
    assert!(Arc::ptr_eq(checkout.resource().unwrap(), &git));
    assert_eq!(checkout.env().get("SEED").map(String::as_str), Some("1"));

    let BacklogItem::Batch(batch) = &plan.items[1] else {
        panic!("second entry should be a batch");
    };
    assert_eq!(batch[0].name(), "train");
    assert!(batch[0].working_dir().ends_with("work"));
    assert!(batch[0].working_dir().is_absolute());
    assert_eq!(batch[0].env().get("SEED").map(String::as_str), Some("7"));
    assert_eq!(batch[1].timeout(), Some(Duration::from_millis(1500)));

    assert!(dir.path().join("out/train").is_dir());
    assert!(dir.path().join("out/eval").is_dir());
}

#[test]
fn json_plans_are_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let text = r#"{
        "experiment": "named",
        "runs": [{ "name": "hello", "command": "echo hi" }]
    }"#;

    let file = PlanFile::parse(text, PlanFormat::Json, dir.path()).unwrap();
    assert_eq!(file.config.experiment_name(), "named");
    assert_eq!(file.base_dir(), dir.path());

    let plan = file.into_plan().unwrap();
    assert_eq!(plan.task_count(), 1);
}

#[test]
fn undeclared_resource_is_rejected() {
    let text = r#"
runs:
  - name: checkout
    command: git checkout main
    resource: git
"#;
    let error = PlanFile::parse(text, PlanFormat::Yaml, ".")
        .unwrap()
        .validate()
        .unwrap_err();

    assert_eq!(error.subsystem, Subsystem::Plan);
    assert!(error.message.contains("undeclared resource 'git'"));
}

#[test]
fn empty_batches_and_commands_are_rejected() {
    let empty_batch = "runs:\n  - batch: []\n";
    let error = PlanFile::parse(empty_batch, PlanFormat::Yaml, ".")
        .unwrap()
        .validate()
        .unwrap_err();
    assert!(error.message.contains("empty"));

    let empty_command = "runs:\n  - name: blank\n    command: '  '\n";
    let error = PlanFile::parse(empty_command, PlanFormat::Yaml, ".")
        .unwrap()
        .validate()
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);

    let no_runs = "runs: []\n";
    assert!(
        PlanFile::parse(no_runs, PlanFormat::Yaml, ".")
            .unwrap()
            .validate()
            .is_err()
    );
}

#[test]
fn bad_timeout_and_unknown_fields_are_rejected() {
    let negative = "runs:\n  - name: t\n    command: 'true'\n    timeout_secs: -1\n";
    assert!(
        PlanFile::parse(negative, PlanFormat::Yaml, ".")
            .unwrap()
            .validate()
            .is_err()
    );

    let typo = "runs:\n  - name: t\n    comand: 'true'\n";
    let error = PlanFile::parse(typo, PlanFormat::Yaml, ".").unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
}

#[test]
fn out_of_range_timeout_is_rejected_not_panicking() {
    let dir = tempfile::tempdir().unwrap();
    let text = r#"{"runs":[{"name":"a","command":"true","output":"out","timeout_secs":1e30}]}"#;

    let file = PlanFile::parse(text, PlanFormat::Json, dir.path()).unwrap();
    let error = file.validate().unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    assert!(error.message.contains("timeout"));

    let error = PlanFile::parse(text, PlanFormat::Json, dir.path())
        .unwrap()
        .into_plan()
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    assert!(!dir.path().join("out").exists());

    let tiny = r#"{"runs":[{"name":"a","command":"true","timeout_secs":1e-12}]}"#;
    assert!(
        PlanFile::parse(tiny, PlanFormat::Json, dir.path())
            .unwrap()
            .validate()
            .is_err()
    );
}

#[test]
fn misspelled_top_level_key_is_rejected() {
    let text = "worker: 4\nruns:\n  - name: t\n    command: 'true'\n";
    let file = PlanFile::parse(text, PlanFormat::Yaml, ".").unwrap();
    assert_eq!(file.config.workers, None);

    let error = file.validate().unwrap_err();
    assert_eq!(error.subsystem, Subsystem::Plan);
    assert!(error.message.contains("unknown top-level key 'worker'"));

    let good = "workers: 4\nruns:\n  - name: t\n    command: 'true'\n";
    PlanFile::parse(good, PlanFormat::Yaml, ".")
        .unwrap()
        .validate()
        .unwrap();
}

#[test]
fn unknown_extension_is_rejected() {
    let error = PlanFile::from_path(std::path::Path::new("plan.toml")).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
}

#[test]
fn builder_collects_items_and_rejects_empty_batches() {
    let mut builder = PlanBuilder::new();
    let lock = builder.resource("git");
    builder.task(hypo_core::plan::builtin::git_status().unwrap());
    builder
        .batch(vec![
            hypo_core::plan::builtin::git_checkout("main", lock.clone()).unwrap(),
        ])
        .unwrap();

    let error = builder.batch(Vec::new()).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);

    assert_eq!(builder.task_count(), 2);
    let items = builder.build();
    assert_eq!(items.len(), 2);
    assert!(Arc::ptr_eq(&lock, &builder_lock(&items)));
}

fn builder_lock(items: &[BacklogItem]) -> Arc<hypo_core::resources::ExclusiveResource> {
    match &items[1] {
        BacklogItem::Batch(batch) => batch[0].resource().unwrap().clone(),
        other => panic!("expected a batch, got {other:?}"),
    }
}
