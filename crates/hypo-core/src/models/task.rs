use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::execution::ProcessExitStatus;
use crate::models::{CoreError, CoreErrorKind, CoreResult, Subsystem};
use crate::resources::ExclusiveResource;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl TaskId {
    fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed,
}

/// Ordered tasks run back to back by one worker under one device lease.
pub type TaskBatch = Vec<Task>;

#[derive(Clone)]
pub struct TaskSpec {
    name: String,
    command: String,
    working_dir: PathBuf,
    output_dir: PathBuf,
    resource: Option<Arc<ExclusiveResource>>,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            working_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            resource: None,
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = working_dir.into();
        self
    }

    pub fn output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn resource(mut self, resource: Arc<ExclusiveResource>) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(
        mut self,
        vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.env
            .extend(vars.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolves both directories to absolute paths and creates the output
    /// directory. Creating an existing directory is not an error.
    pub fn build(self) -> CoreResult<Task> {
        if self.command.trim().is_empty() {
            return Err(invalid_task(format!(
                "task '{}' has an empty command",
                self.name
            )));
        }

        if let Some(timeout) = self.timeout
            && timeout.is_zero()
        {
            return Err(invalid_task(format!(
                "task '{}' timeout must be greater than zero when provided",
                self.name
            )));
        }

        let working_dir = absolute(&self.working_dir)?;
        let output_dir = absolute(&self.output_dir)?;
        std::fs::create_dir_all(&output_dir).map_err(|error| {
            CoreError::new(
                Subsystem::Plan,
                CoreErrorKind::StorageFailure,
                format!(
                    "failed to create output directory '{}': {error}",
                    output_dir.display()
                ),
            )
        })?;

        Ok(Task {
            id: TaskId::next(),
            name: self.name,
            command: self.command,
            working_dir,
            output_dir,
            resource: self.resource,
            env: self.env,
            timeout: self.timeout,
            created_at: SystemTime::now(),
        })
    }
}

/// One unit of work. Immutable once built; the worker that runs it turns it
/// into a [`TaskResult`] via [`Task::finish`].
pub struct Task {
    id: TaskId,
    name: String,
    command: String,
    working_dir: PathBuf,
    output_dir: PathBuf,
    resource: Option<Arc<ExclusiveResource>>,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
    created_at: SystemTime,
}

impl Task {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn resource(&self) -> Option<&Arc<ExclusiveResource>> {
        self.resource.as_ref()
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn finish(self, run: TaskRun) -> TaskResult {
        let duration = run
            .finished_at
            .duration_since(run.started_at)
            .unwrap_or(Duration::ZERO);
        let status = match (&run.exit_status, &run.failure) {
            (Some(ProcessExitStatus::ExitCode(0)), None) => TaskStatus::Succeeded,
            _ => TaskStatus::Failed,
        };

        TaskResult {
            id: self.id,
            name: self.name,
            command: self.command,
            working_dir: self.working_dir,
            output_dir: self.output_dir,
            resource: self.resource.map(|resource| resource.name().to_string()),
            device: run.device,
            worker: run.worker,
            created_at: self.created_at,
            started_at: run.started_at,
            finished_at: run.finished_at,
            duration,
            exit_status: run.exit_status,
            status,
            failure: run.failure,
        }
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("command", &self.command)
            .field("working_dir", &self.working_dir)
            .field("output_dir", &self.output_dir)
            .field(
                "resource",
                &self.resource.as_ref().map(|resource| resource.name()),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// What the worker observed while running a task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskRun {
    pub worker: usize,
    pub device: Option<u32>,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
    pub exit_status: Option<ProcessExitStatus>,
    pub failure: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskResult {
    pub id: TaskId,
    pub name: String,
    pub command: String,
    pub working_dir: PathBuf,
    pub output_dir: PathBuf,
    pub resource: Option<String>,
    pub device: Option<u32>,
    pub worker: usize,
    pub created_at: SystemTime,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
    pub duration: Duration,
    pub exit_status: Option<ProcessExitStatus>,
    pub status: TaskStatus,
    pub failure: Option<String>,
}

impl TaskResult {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.exit_status {
            Some(ProcessExitStatus::ExitCode(code)) => Some(code),
            _ => None,
        }
    }

    pub fn duration_ms(&self) -> u128 {
        self.duration.as_millis()
    }
}

fn absolute(path: &Path) -> CoreResult<PathBuf> {
    std::path::absolute(path).map_err(|error| {
        invalid_task(format!(
            "failed to resolve path '{}': {error}",
            path.display()
        ))
    })
}

fn invalid_task(message: String) -> CoreError {
    CoreError::new(Subsystem::Plan, CoreErrorKind::InvalidInput, message)
}
