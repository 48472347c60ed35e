pub mod json_summary;

pub use json_summary::{DEFAULT_SUMMARY_PATH, SummaryWriter};

use crate::models::{CoreResult, ExperimentMeta, ExperimentSummary, TaskResult};

pub trait SummaryStore: Send + Sync {
    /// Appends one summary, keeping every summary already stored.
    fn append(&self, summary: &ExperimentSummary) -> CoreResult<()>;

    fn load(&self) -> CoreResult<Vec<ExperimentSummary>>;

    fn flush(&self, results: &[TaskResult], meta: &ExperimentMeta) -> CoreResult<ExperimentSummary> {
        let summary = ExperimentSummary::new(meta, results);
        self.append(&summary)?;
        Ok(summary)
    }
}
