pub mod accumulator;
pub mod backlog;
pub mod dispatcher;
pub mod progress;

pub use accumulator::ResultAccumulator;
pub use backlog::{BacklogItem, DEFAULT_BACKLOG_CAPACITY, TaskBacklog};
pub use dispatcher::{
    DEFAULT_DEVICE_ENV_VAR, Dispatcher, LaunchReport, WorkerReport, WorkerState,
};
pub use progress::{CountingProgress, LogProgress, NoProgress, ProgressReporter};
