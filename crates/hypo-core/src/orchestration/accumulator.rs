use std::sync::{Mutex, MutexGuard};

use crate::models::error::poisoned;
use crate::models::{CoreResult, Subsystem, TaskResult};

/// Completed task results in completion order. One instance per launch.
#[derive(Debug, Default)]
pub struct ResultAccumulator {
    entries: Mutex<Vec<TaskResult>>,
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a whole batch under one lock; returns the new entry count.
    pub fn append(&self, results: Vec<TaskResult>) -> CoreResult<usize> {
        let mut entries = self.lock_entries()?;
        entries.extend(results);
        Ok(entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> CoreResult<Vec<TaskResult>> {
        Ok(self.lock_entries()?.clone())
    }

    pub fn into_results(self) -> CoreResult<Vec<TaskResult>> {
        self.entries
            .into_inner()
            .map_err(|_| poisoned(Subsystem::Dispatcher, "result accumulator"))
    }

    fn lock_entries(&self) -> CoreResult<MutexGuard<'_, Vec<TaskResult>>> {
        self.entries
            .lock()
            .map_err(|_| poisoned(Subsystem::Dispatcher, "result accumulator"))
    }
}
