use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinSet;

use crate::config::LauncherConfig;
use crate::execution::{
    CommandSpec, ProcessExecutor, ProcessExitStatus, ProcessSpawnRequest, TokioProcessExecutor,
    spawn_validated,
};
use crate::models::clock::{elapsed_between, format_seconds};
use crate::models::{
    CoreError, CoreErrorKind, CoreResult, ExperimentMeta, Subsystem, Task, TaskBatch, TaskResult,
    TaskRun,
};
use crate::orchestration::{LogProgress, ProgressReporter, ResultAccumulator, TaskBacklog};
use crate::resources::DevicePool;

pub const DEFAULT_DEVICE_ENV_VAR: &str = "CUDA_VISIBLE_DEVICES";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum WorkerState {
    WaitingForWork,
    LeasingResources,
    Executing,
    ReleasingResources,
    Recording,
    Stopped,
    Failed,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkerReport {
    pub worker: usize,
    pub state: WorkerState,
    pub batches: usize,
    pub tasks: usize,
    pub error: Option<CoreError>,
}

impl WorkerReport {
    fn new(worker: usize) -> Self {
        Self {
            worker,
            state: WorkerState::WaitingForWork,
            batches: 0,
            tasks: 0,
            error: None,
        }
    }

    fn transition(&mut self, next: WorkerState) {
        tracing::trace!(worker = self.worker, from = ?self.state, to = ?next, "worker state");
        self.state = next;
    }
}

#[derive(Clone, Debug)]
pub struct LaunchReport {
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
    pub results: Vec<TaskResult>,
    pub workers: Vec<WorkerReport>,
    pub sentinel_republishes: usize,
    pub producer_error: Option<CoreError>,
}

impl LaunchReport {
    pub fn wall_time(&self) -> Duration {
        elapsed_between(self.started_at, self.finished_at)
    }

    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|result| !result.succeeded())
    }

    /// First error that stopped a worker, otherwise the producer's error.
    ///
    /// Workers come first: once they are gone the backlog is shut down, and a
    /// producer still waiting for capacity then fails with a closed-backlog
    /// error that only echoes the worker's failure.
    pub fn fatal_error(&self) -> Option<&CoreError> {
        self.workers
            .iter()
            .find_map(|worker| worker.error.as_ref())
            .or(self.producer_error.as_ref())
    }

    pub fn check(&self) -> CoreResult<()> {
        match self.fatal_error() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    pub fn meta(&self, experiment: impl Into<String>) -> ExperimentMeta {
        ExperimentMeta {
            experiment: experiment.into(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Fixed pool of workers draining one backlog.
#[derive(Clone)]
pub struct Dispatcher {
    worker_count: usize,
    devices: Arc<DevicePool>,
    executor: Arc<dyn ProcessExecutor>,
    progress: Arc<dyn ProgressReporter>,
    device_env_var: String,
    remove_failed_output: bool,
}

impl Dispatcher {
    pub fn new(device_ids: &BTreeSet<u32>, worker_count: usize) -> CoreResult<Self> {
        let devices = DevicePool::new(device_ids, worker_count)?;
        Ok(Self {
            worker_count,
            devices: Arc::new(devices),
            executor: Arc::new(TokioProcessExecutor),
            progress: Arc::new(LogProgress),
            device_env_var: DEFAULT_DEVICE_ENV_VAR.to_string(),
            remove_failed_output: false,
        })
    }

    pub fn from_config(config: &LauncherConfig) -> CoreResult<Self> {
        let devices = config.resolved_devices();
        let workers = config.resolved_workers(&devices);
        Ok(Self::new(&devices, workers)?
            .device_env_var(config.device_env_var.clone())
            .remove_failed_output(config.remove_failed_output))
    }

    pub fn with_executor(mut self, executor: Arc<dyn ProcessExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn device_env_var(mut self, name: impl Into<String>) -> Self {
        self.device_env_var = name.into();
        self
    }

    pub fn remove_failed_output(mut self, enabled: bool) -> Self {
        self.remove_failed_output = enabled;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn devices(&self) -> &Arc<DevicePool> {
        &self.devices
    }

    /// Runs every worker until each has seen the sentinel (or stopped on a
    /// fatal error) and returns the collected results. The backlog must be
    /// closed by its producer, otherwise workers wait for more work forever.
    pub async fn launch(&self, backlog: Arc<TaskBacklog>) -> CoreResult<LaunchReport> {
        let started_at = SystemTime::now();
        let accumulator = Arc::new(ResultAccumulator::new());
        tracing::info!(workers = self.worker_count, "launching workers");

        let mut workers = JoinSet::new();
        let mut worker_ids = HashMap::new();
        for worker in 0..self.worker_count {
            let context = WorkerContext {
                worker,
                backlog: backlog.clone(),
                devices: self.devices.clone(),
                executor: self.executor.clone(),
                progress: self.progress.clone(),
                accumulator: accumulator.clone(),
                device_env_var: self.device_env_var.clone(),
                remove_failed_output: self.remove_failed_output,
            };
            let handle = workers.spawn(context.run());
            worker_ids.insert(handle.id(), worker);
        }

        let mut reports = Vec::with_capacity(self.worker_count);
        while let Some(joined) = workers.join_next_with_id().await {
            match joined {
                Ok((_, report)) => reports.push(report),
                Err(join_error) => {
                    let worker = worker_ids.get(&join_error.id()).copied().unwrap_or_default();
                    tracing::error!(worker, error = %join_error, "worker aborted");
                    let mut report = WorkerReport::new(worker);
                    report.state = WorkerState::Failed;
                    report.error = Some(CoreError::new(
                        Subsystem::Dispatcher,
                        CoreErrorKind::Internal,
                        format!("worker {worker} aborted: {join_error}"),
                    ));
                    reports.push(report);
                }
            }
        }
        reports.sort_by_key(|report| report.worker);

        // Nobody drains the backlog any more; wake producers still waiting.
        backlog.shutdown();

        let results = match Arc::try_unwrap(accumulator) {
            Ok(accumulator) => accumulator.into_results()?,
            Err(shared) => shared.snapshot()?,
        };
        let finished_at = SystemTime::now();
        let failed = results.iter().filter(|result| !result.succeeded()).count();
        tracing::info!(
            tasks = results.len(),
            failed,
            seconds = %format_seconds(elapsed_between(started_at, finished_at)),
            "all tasks done"
        );

        Ok(LaunchReport {
            started_at,
            finished_at,
            results,
            workers: reports,
            sentinel_republishes: backlog.sentinel_republishes(),
            producer_error: None,
        })
    }

    /// Runs `producer` next to the workers, feeding a bounded backlog. The
    /// backlog is closed once the producer returns, whatever the outcome.
    pub async fn launch_with_producer<F, Fut>(
        &self,
        capacity: usize,
        producer: F,
    ) -> CoreResult<LaunchReport>
    where
        F: FnOnce(Arc<TaskBacklog>) -> Fut,
        Fut: Future<Output = CoreResult<()>> + Send + 'static,
    {
        let backlog = Arc::new(TaskBacklog::new(capacity));
        let production = producer(backlog.clone());
        let producing = tokio::spawn({
            let backlog = backlog.clone();
            async move {
                let outcome = production.await;
                if let Err(error) = &outcome {
                    tracing::error!(message = %error.message, "producer stopped early");
                }
                backlog.close()?;
                outcome
            }
        });

        let mut report = self.launch(backlog).await?;
        report.producer_error = match producing.await {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error),
            Err(join_error) => Some(CoreError::new(
                Subsystem::Dispatcher,
                CoreErrorKind::Internal,
                format!("producer aborted: {join_error}"),
            )),
        };
        Ok(report)
    }

    /// Pushes every item, closes the backlog and launches.
    pub async fn run_items(
        &self,
        capacity: usize,
        items: Vec<crate::orchestration::BacklogItem>,
    ) -> CoreResult<LaunchReport> {
        self.launch_with_producer(capacity, move |backlog| async move {
            for item in items {
                backlog.push(item).await?;
            }
            Ok(())
        })
        .await
    }
}

struct WorkerContext {
    worker: usize,
    backlog: Arc<TaskBacklog>,
    devices: Arc<DevicePool>,
    executor: Arc<dyn ProcessExecutor>,
    progress: Arc<dyn ProgressReporter>,
    accumulator: Arc<ResultAccumulator>,
    device_env_var: String,
    remove_failed_output: bool,
}

impl WorkerContext {
    async fn run(self) -> WorkerReport {
        let mut report = WorkerReport::new(self.worker);
        if let Err(error) = self.drain(&mut report).await {
            tracing::error!(
                worker = self.worker,
                subsystem = %error.subsystem,
                kind = ?error.kind,
                message = %error.message,
                "worker stopped on fatal error"
            );
            report.transition(WorkerState::Failed);
            report.error = Some(error);
        }
        report
    }

    async fn drain(&self, report: &mut WorkerReport) -> CoreResult<()> {
        loop {
            report.transition(WorkerState::WaitingForWork);
            let item = self.backlog.pop_front().await?;
            let Some(batch) = item.into_batch()? else {
                self.backlog.republish_sentinel()?;
                report.transition(WorkerState::Stopped);
                tracing::debug!(worker = self.worker, "worker stopped");
                return Ok(());
            };

            report.transition(WorkerState::LeasingResources);
            let lease = self.devices.lease()?;
            let device = lease.id();

            report.transition(WorkerState::Executing);
            let (results, failure) = self.run_batch(batch, device).await;

            report.transition(WorkerState::ReleasingResources);
            let released = lease.release();

            report.transition(WorkerState::Recording);
            let count = results.len();
            let completed = self.accumulator.append(results)?;
            let total = self.backlog.queued_tasks();
            for done in (completed + 1 - count)..=completed {
                self.progress.advance(done, total);
            }
            report.batches += 1;
            report.tasks += count;

            released?;
            if let Some(error) = failure {
                return Err(error);
            }
        }
    }

    async fn run_batch(
        &self,
        batch: TaskBatch,
        device: u32,
    ) -> (Vec<TaskResult>, Option<CoreError>) {
        let mut results = Vec::with_capacity(batch.len());
        for task in batch {
            match self.run_task(task, device).await {
                Ok(result) => results.push(result),
                Err(error) => return (results, Some(error)),
            }
        }
        (results, None)
    }

    async fn run_task(&self, task: Task, device: u32) -> CoreResult<TaskResult> {
        let resource_lease = match task.resource() {
            Some(resource) => {
                tracing::debug!(
                    worker = self.worker,
                    task = %task.name(),
                    resource = %resource.name(),
                    "waiting for resource"
                );
                Some(resource.lease().await.map_err(|error| error.with_task(task.id()))?)
            }
            None => None,
        };

        tracing::info!(
            worker = self.worker,
            device,
            task = %task.name(),
            command = %task.command(),
            cwd = %task.working_dir().display(),
            output = %task.output_dir().display(),
            "launch"
        );

        let command = CommandSpec::shell(task.command())
            .working_dir(task.working_dir())
            .envs(task.env())
            .env(self.device_env_var.as_str(), device.to_string());
        let mut request = ProcessSpawnRequest::new(task.id(), command);
        if let Some(timeout) = task.timeout() {
            request = request.timeout(timeout);
        }

        let started_at = SystemTime::now();
        let outcome = match spawn_validated(self.executor.as_ref(), request) {
            Ok(process) => process.wait().await,
            Err(error) => Err(error),
        };
        let finished_at = SystemTime::now();
        drop(resource_lease);

        let (exit_status, failure) = match outcome {
            Ok(outcome) if outcome.status.success() => (Some(outcome.status), None),
            Ok(outcome) => (Some(outcome.status), Some(describe_exit(outcome.status))),
            Err(error) => (None, Some(error.message)),
        };

        let duration_ms = elapsed_between(started_at, finished_at).as_millis();
        match &failure {
            None => tracing::info!(
                worker = self.worker,
                task = %task.name(),
                duration_ms,
                "task finished"
            ),
            Some(reason) => {
                tracing::error!(
                    worker = self.worker,
                    device,
                    task = %task.name(),
                    command = %task.command(),
                    reason = %reason,
                    duration_ms,
                    "task failed"
                );
                if self.remove_failed_output {
                    remove_output(&task);
                }
            }
        }

        Ok(task.finish(TaskRun {
            worker: self.worker,
            device: Some(device),
            started_at,
            finished_at,
            exit_status,
            failure,
        }))
    }
}

fn describe_exit(status: ProcessExitStatus) -> String {
    match status {
        ProcessExitStatus::ExitCode(code) => format!("exit code: {code}"),
        ProcessExitStatus::Terminated => "terminated by signal".to_string(),
    }
}

/// Removes a failed task's output directory unless that would also remove the
/// task's working directory.
fn remove_output(task: &Task) {
    let output = task.output_dir();
    if is_protected(output, task.working_dir()) {
        tracing::warn!(
            task = %task.name(),
            output = %output.display(),
            "keeping output directory that contains the working directory"
        );
        return;
    }

    match std::fs::remove_dir_all(output) {
        Ok(()) => tracing::warn!(
            task = %task.name(),
            output = %output.display(),
            "removed output of failed task"
        ),
        Err(error) => tracing::warn!(
            task = %task.name(),
            output = %output.display(),
            %error,
            "failed to remove output of failed task"
        ),
    }
}

fn is_protected(output: &Path, working_dir: &Path) -> bool {
    output.parent().is_none() || working_dir.starts_with(output)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{describe_exit, is_protected};
    use crate::execution::ProcessExitStatus;

    #[test]
    fn output_containing_working_dir_is_protected() {
        assert!(is_protected(Path::new("/data/exp"), Path::new("/data/exp")));
        assert!(is_protected(Path::new("/data"), Path::new("/data/exp")));
        assert!(is_protected(Path::new("/"), Path::new("/tmp")));
        assert!(!is_protected(
            Path::new("/data/exp/out"),
            Path::new("/data/exp")
        ));
    }

    #[test]
    fn exit_descriptions_name_the_code() {
        assert_eq!(
            describe_exit(ProcessExitStatus::ExitCode(3)),
            "exit code: 3"
        );
        assert_eq!(
            describe_exit(ProcessExitStatus::Terminated),
            "terminated by signal"
        );
    }
}
