use std::sync::Arc;

use crate::models::{CoreError, CoreErrorKind, CoreResult, Subsystem, Task, TaskBatch};
use crate::orchestration::BacklogItem;
use crate::resources::{ExclusiveResource, ResourceRegistry};

/// Collects tasks and batches in submission order for code-defined
/// experiments.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    resources: ResourceRegistry,
    items: Vec<BacklogItem>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Named exclusive resource shared by every task that is given it.
    pub fn resource(&mut self, name: &str) -> Arc<ExclusiveResource> {
        self.resources.register(name)
    }

    pub fn task(&mut self, task: Task) -> &mut Self {
        self.items.push(BacklogItem::Task(task));
        self
    }

    pub fn batch(&mut self, tasks: TaskBatch) -> CoreResult<&mut Self> {
        if tasks.is_empty() {
            return Err(CoreError::new(
                Subsystem::Plan,
                CoreErrorKind::InvalidInput,
                "a batch needs at least one task",
            ));
        }
        self.items.push(BacklogItem::Batch(tasks));
        Ok(self)
    }

    pub fn task_count(&self) -> usize {
        self.items.iter().map(BacklogItem::task_count).sum()
    }

    pub fn build(self) -> Vec<BacklogItem> {
        self.items
    }
}
