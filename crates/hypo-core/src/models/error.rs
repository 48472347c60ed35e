use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::models::TaskId;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Subsystem {
    Backlog,
    Devices,
    Resources,
    Execution,
    Dispatcher,
    Summary,
    Plan,
    Config,
}

impl Display for Subsystem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Subsystem::Backlog => "backlog",
            Subsystem::Devices => "devices",
            Subsystem::Resources => "resources",
            Subsystem::Execution => "execution",
            Subsystem::Dispatcher => "dispatcher",
            Subsystem::Summary => "summary",
            Subsystem::Plan => "plan",
            Subsystem::Config => "config",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    TaskExecutionFailure,
    Timeout,
    ResourceExhausted,
    InvariantViolation,
    SummaryCorruption,
    BacklogContractViolation,
    StorageFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("[{subsystem}] {kind:?}: {message}")]
pub struct CoreError {
    pub subsystem: Subsystem,
    pub task: Option<TaskId>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(subsystem: Subsystem, kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            subsystem,
            task: None,
            kind,
            message: message.into(),
        }
    }

    pub fn with_task(mut self, task: TaskId) -> Self {
        self.task = Some(task);
        self
    }

    /// Task-level failures are recovered inside the worker; everything else
    /// stops the component that observed it.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self.kind,
            CoreErrorKind::TaskExecutionFailure | CoreErrorKind::Timeout
        )
    }
}

pub(crate) fn poisoned(subsystem: Subsystem, what: &str) -> CoreError {
    CoreError::new(
        subsystem,
        CoreErrorKind::Internal,
        format!("{what} mutex poisoned"),
    )
}
