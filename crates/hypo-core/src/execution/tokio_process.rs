use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::execution::{
    ProcessExecutor, ProcessExitStatus, ProcessOutcome, ProcessSpawnRequest, ProcessWaitFuture,
    RunningProcess,
};
use crate::models::{CoreError, CoreErrorKind, CoreResult, Subsystem, TaskId};

pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> CoreResult<Box<dyn RunningProcess>> {
        let mut cmd = tokio::process::Command::new(&request.command.program);
        cmd.args(&request.command.args);

        for (key, value) in &request.command.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &request.command.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        // A timed process gets its own group so the whole tree can be killed.
        #[cfg(unix)]
        if request.timeout.is_some() {
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|error| {
            process_failure(
                request.task,
                format!(
                    "failed to spawn '{}': {error}",
                    request.command.program.display()
                ),
            )
        })?;

        let pid = child.id();
        let started_at = SystemTime::now();

        Ok(Box::new(TokioRunningProcess {
            child: Mutex::new(Some(child)),
            pid,
            started_at,
            timeout: request.timeout,
            task: request.task,
        }))
    }
}

struct TokioRunningProcess {
    child: Mutex<Option<tokio::process::Child>>,
    pid: Option<u32>,
    started_at: SystemTime,
    timeout: Option<Duration>,
    task: TaskId,
}

impl RunningProcess for TokioRunningProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let child = self.child.into_inner().ok().flatten();
        let timeout = self.timeout;
        let started_at = self.started_at;
        let task = self.task;
        let pid = self.pid;

        Box::pin(async move {
            let mut child = child.ok_or_else(|| {
                process_failure(task, "child process already consumed".to_string())
            })?;

            let wait_err = |error: std::io::Error| {
                process_failure(task, format!("failed to wait for process: {error}"))
            };

            let status = if let Some(timeout_duration) = timeout {
                match tokio::time::timeout(timeout_duration, child.wait()).await {
                    Ok(result) => result.map_err(wait_err)?,
                    Err(_) => {
                        kill_tree(&mut child, pid);
                        let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
                        return Err(CoreError::new(
                            Subsystem::Execution,
                            CoreErrorKind::Timeout,
                            format!(
                                "process timed out after {}ms",
                                timeout_duration.as_millis()
                            ),
                        )
                        .with_task(task));
                    }
                }
            } else {
                child.wait().await.map_err(wait_err)?
            };

            let status = match status.code() {
                Some(code) => ProcessExitStatus::ExitCode(code),
                None => ProcessExitStatus::Terminated,
            };

            Ok(ProcessOutcome {
                status,
                started_at,
                finished_at: SystemTime::now(),
            })
        })
    }
}

#[cfg(unix)]
fn kill_tree(_child: &mut tokio::process::Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        let pgid = -(pid as libc::pid_t);
        unsafe {
            libc::kill(pgid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut tokio::process::Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}

fn process_failure(task: TaskId, message: String) -> CoreError {
    CoreError::new(
        Subsystem::Execution,
        CoreErrorKind::TaskExecutionFailure,
        message,
    )
    .with_task(task)
}
