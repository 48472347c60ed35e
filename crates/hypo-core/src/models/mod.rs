pub mod clock;
pub mod error;
pub mod summary;
pub mod task;

pub use error::{CoreError, CoreErrorKind, CoreResult, Subsystem};
pub use summary::{ExperimentMeta, ExperimentSummary, RunRecord};
pub use task::{Task, TaskBatch, TaskId, TaskResult, TaskRun, TaskSpec, TaskStatus};
