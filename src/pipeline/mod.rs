//! Batch drivers for the two pipeline stages.
//!
//! Each worker drains its backlog: pop, process, archive. A NOTIFY
//! wakeup keeps latency low; a poll interval catches anything a missed
//! notification or visibility-timeout redelivery leaves behind. Both
//! stages isolate per-item failures — one bad item never halts a drain.

pub mod diff_worker;
pub mod score_worker;

pub use diff_worker::DiffWorker;
pub use score_worker::ScoreWorker;

/// Configuration shared by both worker loops.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Visibility timeout (seconds) for backlog reads. A popped item
    /// whose processing fails reappears after this long.
    pub visibility_timeout: i32,
    /// Poll interval fallback when no NOTIFY arrives.
    pub poll_interval: std::time::Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: 60,
            poll_interval: std::time::Duration::from_secs(5),
        }
    }
}

/// What one pass over a backlog accomplished.
#[derive(Debug, Default, Clone, Copy)]
pub struct DrainStats {
    /// Items fully processed and archived.
    pub processed: usize,
    /// Expected skips (first capture of a page, duplicate redelivery).
    pub skipped: usize,
    /// Items left on the backlog for redelivery after a failure.
    pub failed: usize,
}
