use serde::{Deserialize, Serialize};

/// Default minimum spacing between dispatch starts.
pub const DEFAULT_DELAY_BETWEEN_CERTS_MS: u64 = 500;
/// Default per-job concurrency bound; creation clamps it to the plan's.
pub const DEFAULT_MAX_CONCURRENT: u32 = 3;
/// Default chunk size for batched ownership transfers.
pub const DEFAULT_TRANSFER_BATCH_SIZE: u32 = 10;

/// Per-job dispatch configuration, defaults filled at creation time and
/// immutable once the job is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Minimum milliseconds between dispatch *starts* (not completions),
    /// bounding the relayer request rate regardless of relayer latency.
    pub delay_between_certs_ms: u64,
    /// Items simultaneously in flight against the relayer.
    pub max_concurrent: u32,
    /// Keep dispatching after an item fails.
    pub continue_on_error: bool,
    /// Amortize ownership transfers into chunked transactions.
    pub batch_transfer: bool,
    pub transfer_batch_size: u32,
    /// Accept slower inclusion for a lower gas price.
    pub gas_optimization: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            delay_between_certs_ms: DEFAULT_DELAY_BETWEEN_CERTS_MS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            continue_on_error: true,
            batch_transfer: false,
            transfer_batch_size: DEFAULT_TRANSFER_BATCH_SIZE,
            gas_optimization: false,
        }
    }
}
