use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::{Notify, Semaphore};

use crate::models::error::poisoned;
use crate::models::{CoreError, CoreErrorKind, CoreResult, Subsystem, Task, TaskBatch};

pub const DEFAULT_BACKLOG_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum BacklogItem {
    Task(Task),
    Batch(TaskBatch),
    Sentinel,
}

impl BacklogItem {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, BacklogItem::Sentinel)
    }

    pub fn task_count(&self) -> usize {
        match self {
            BacklogItem::Task(_) => 1,
            BacklogItem::Batch(tasks) => tasks.len(),
            BacklogItem::Sentinel => 0,
        }
    }

    /// Normalises work into a batch. `None` means the sentinel was popped.
    pub fn into_batch(self) -> CoreResult<Option<TaskBatch>> {
        match self {
            BacklogItem::Task(task) => Ok(Some(vec![task])),
            BacklogItem::Batch(tasks) if tasks.is_empty() => Err(CoreError::new(
                Subsystem::Backlog,
                CoreErrorKind::BacklogContractViolation,
                "popped an empty batch; batches must hold at least one task",
            )),
            BacklogItem::Batch(tasks) => Ok(Some(tasks)),
            BacklogItem::Sentinel => Ok(None),
        }
    }
}

impl From<Task> for BacklogItem {
    fn from(task: Task) -> Self {
        BacklogItem::Task(task)
    }
}

impl From<TaskBatch> for BacklogItem {
    fn from(tasks: TaskBatch) -> Self {
        BacklogItem::Batch(tasks)
    }
}

/// Shared FIFO drained by every worker.
///
/// Work items take a capacity slot, so producers wait while the backlog is
/// full. The sentinel never takes a slot: `close` appends it once and each
/// worker that pops it puts it back through `republish_sentinel`, which lets
/// every worker observe it.
#[derive(Debug)]
pub struct TaskBacklog {
    items: Mutex<VecDeque<BacklogItem>>,
    available: Notify,
    capacity: Semaphore,
    closed: AtomicBool,
    queued_tasks: AtomicUsize,
    republished: AtomicUsize,
}

impl Default for TaskBacklog {
    fn default() -> Self {
        Self::new(DEFAULT_BACKLOG_CAPACITY)
    }
}

impl TaskBacklog {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            capacity: Semaphore::new(capacity.max(1)),
            closed: AtomicBool::new(false),
            queued_tasks: AtomicUsize::new(0),
            republished: AtomicUsize::new(0),
        }
    }

    /// Appends work, waiting while the backlog is at capacity. Pushing the
    /// sentinel is the same as calling [`TaskBacklog::close`].
    pub async fn push(&self, item: impl Into<BacklogItem>) -> CoreResult<()> {
        let item = item.into();
        if item.is_sentinel() {
            return self.close();
        }
        if self.is_closed() {
            return Err(closed_error());
        }

        let permit = self.capacity.acquire().await.map_err(|_| closed_error())?;
        permit.forget();

        // `closed` is checked under the same lock `close` appends the sentinel
        // with, so accepted work always sits ahead of the sentinel.
        let tasks = item.task_count();
        {
            let mut items = self.lock_items()?;
            if self.is_closed() {
                drop(items);
                self.capacity.add_permits(1);
                return Err(closed_error());
            }
            items.push_back(item);
            self.queued_tasks.fetch_add(tasks, Ordering::SeqCst);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Appends the sentinel. Only the first call has an effect.
    pub fn close(&self) -> CoreResult<()> {
        {
            let mut items = self.lock_items()?;
            if self.closed.swap(true, Ordering::SeqCst) {
                tracing::debug!("backlog already closed");
                return Ok(());
            }
            items.push_back(BacklogItem::Sentinel);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Waits for the next item or the sentinel.
    pub async fn pop_front(&self) -> CoreResult<BacklogItem> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.lock_items()?.pop_front() {
                if !item.is_sentinel() {
                    self.capacity.add_permits(1);
                }
                return Ok(item);
            }

            notified.await;
        }
    }

    pub fn republish_sentinel(&self) -> CoreResult<()> {
        self.lock_items()?.push_back(BacklogItem::Sentinel);
        self.republished.fetch_add(1, Ordering::SeqCst);
        self.available.notify_one();
        Ok(())
    }

    /// Rejects producers still waiting for capacity. Used once no worker is
    /// left to drain the backlog.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.capacity.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tasks ever enqueued, counting every task of every batch.
    pub fn queued_tasks(&self) -> usize {
        self.queued_tasks.load(Ordering::SeqCst)
    }

    pub fn sentinel_republishes(&self) -> usize {
        self.republished.load(Ordering::SeqCst)
    }

    /// Items currently waiting, sentinel included.
    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_items(&self) -> CoreResult<MutexGuard<'_, VecDeque<BacklogItem>>> {
        self.items
            .lock()
            .map_err(|_| poisoned(Subsystem::Backlog, "backlog"))
    }
}

fn closed_error() -> CoreError {
    CoreError::new(
        Subsystem::Backlog,
        CoreErrorKind::InvalidInput,
        "backlog is closed to new work",
    )
}
