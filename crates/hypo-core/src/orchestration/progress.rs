use std::sync::atomic::{AtomicUsize, Ordering};

/// Receives one tick per completed task. `total` is the number of tasks
/// enqueued so far, which can grow while a producer is still running.
pub trait ProgressReporter: Send + Sync {
    fn advance(&self, completed: usize, total: usize);
}

pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn advance(&self, completed: usize, total: usize) {
        tracing::info!(completed, total, "progress");
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn advance(&self, _completed: usize, _total: usize) {}
}

/// Counts ticks; handy for tests and for callers polling from elsewhere.
#[derive(Debug, Default)]
pub struct CountingProgress {
    ticks: AtomicUsize,
    last_total: AtomicUsize,
}

impl CountingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn last_total(&self) -> usize {
        self.last_total.load(Ordering::SeqCst)
    }
}

impl ProgressReporter for CountingProgress {
    fn advance(&self, _completed: usize, total: usize) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        self.last_total.fetch_max(total, Ordering::SeqCst);
    }
}
