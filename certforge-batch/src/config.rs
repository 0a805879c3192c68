use std::time::Duration;

/// Orchestrator-level timing bounds. Per-job pacing and concurrency live
/// in [`certforge_core::BatchOptions`]; these guard the relayer and the
/// job as a whole.
#[derive(Debug, Clone)]
pub struct BatchServiceConfig {
    /// Deadline for a single relayer call. A timed-out call is recorded
    /// as a failed item and frees its concurrency slot; an item is never
    /// left in progress.
    pub item_timeout: Duration,
    /// Deadline for a whole job's dispatch run. When it fires, all
    /// unfinished items are failed so the job still reaches a terminal
    /// state even if the relayer is unreachable for every item.
    pub job_deadline: Duration,
}

impl BatchServiceConfig {
    /// Tight bounds for tests.
    pub fn fast() -> Self {
        Self {
            item_timeout: Duration::from_millis(200),
            job_deadline: Duration::from_secs(5),
        }
    }
}

impl Default for BatchServiceConfig {
    fn default() -> Self {
        Self {
            item_timeout: Duration::from_secs(30),
            job_deadline: Duration::from_secs(60 * 60),
        }
    }
}
