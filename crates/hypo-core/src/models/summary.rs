use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::models::clock::{
    elapsed_between, format_elapsed, format_instant, format_seconds, format_stamp,
};
use crate::models::{TaskResult, TaskStatus};

/// One element of the persisted summary array.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSummary {
    #[serde(rename = "Experiment")]
    pub experiment: String,
    pub time: String,
    pub start: String,
    pub end: String,
    pub runs: Vec<RunRecord>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub name: String,
    pub command: String,
    pub cwd: String,
    pub output: String,
    pub datetime: String,
    pub time_consume: String,
    pub start_at: String,
    pub finish_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub status: TaskStatus,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExperimentMeta {
    pub experiment: String,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
}

impl ExperimentSummary {
    pub fn new(meta: &ExperimentMeta, results: &[TaskResult]) -> Self {
        Self {
            experiment: meta.experiment.clone(),
            time: format_seconds(elapsed_between(meta.started_at, meta.finished_at)),
            start: format_stamp(meta.started_at),
            end: format_stamp(meta.finished_at),
            runs: results.iter().map(RunRecord::from).collect(),
        }
    }
}

impl From<&TaskResult> for RunRecord {
    fn from(result: &TaskResult) -> Self {
        Self {
            name: result.name.clone(),
            command: result.command.clone(),
            cwd: result.working_dir.display().to_string(),
            output: result.output_dir.display().to_string(),
            datetime: format_stamp(result.created_at),
            time_consume: format_elapsed(result.duration),
            start_at: format_instant(result.started_at),
            finish_at: format_instant(result.finished_at),
            resource: result.resource.clone(),
            device: result.device,
            exit_code: result.exit_code(),
            status: result.status,
        }
    }
}
