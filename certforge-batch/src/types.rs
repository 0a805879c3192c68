use std::fmt;

use certforge_core::{BatchOptions, ErrorKind, Recipient};
use serde::{Deserialize, Serialize};

// -----------------
// BatchJobStatus
// -----------------

/// Job lifecycle: `Pending -> Running -> {Completed | PartiallyFailed | Cancelled}`.
/// `Completed` requires every item succeeded; a mix of outcomes is
/// `PartiallyFailed` even when `continue_on_error` let the job run to the
/// end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchJobStatus {
    Pending,
    Running,
    Completed,
    PartiallyFailed,
    Cancelled,
}

impl BatchJobStatus {
    pub fn as_str(&self) -> &'static str {
        use BatchJobStatus::*;
        match self {
            Pending => "pending",
            Running => "running",
            Completed => "completed",
            PartiallyFailed => "partially_failed",
            Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        use BatchJobStatus::*;
        matches!(self, Completed | PartiallyFailed | Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for BatchJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for BatchJobStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, String> {
        use BatchJobStatus::*;
        match value {
            "pending" => Ok(Pending),
            "running" => Ok(Running),
            "completed" => Ok(Completed),
            "partially_failed" => Ok(PartiallyFailed),
            "cancelled" => Ok(Cancelled),
            _ => Err(format!("invalid batch job status: '{}'", value)),
        }
    }
}

// -----------------
// BatchItemStatus
// -----------------

/// Per-item lifecycle: `Queued -> InProgress -> (Succeeded | Failed)`,
/// one-directional. A failed item goes back to `Queued` only through the
/// explicit retry operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
}

impl BatchItemStatus {
    pub fn as_str(&self) -> &'static str {
        use BatchItemStatus::*;
        match self {
            Queued => "queued",
            InProgress => "in_progress",
            Succeeded => "succeeded",
            Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        use BatchItemStatus::*;
        matches!(self, Succeeded | Failed)
    }
}

impl fmt::Display for BatchItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for BatchItemStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, String> {
        use BatchItemStatus::*;
        match value {
            "queued" => Ok(Queued),
            "in_progress" => Ok(InProgress),
            "succeeded" => Ok(Succeeded),
            "failed" => Ok(Failed),
            _ => Err(format!("invalid batch item status: '{}'", value)),
        }
    }
}

// -----------------
// BatchItem
// -----------------

/// A classified per-item failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
}

/// One recipient's slot in a batch. Items keep 1:1 index correspondence
/// with the submitted recipient array so clients can reconcile outcomes
/// positionally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub recipient: Recipient,
    pub status: BatchItemStatus,
    /// Set only on success.
    pub certificate_id: Option<String>,
    /// Set only on failure.
    pub error: Option<ItemError>,
    /// Times this item was dispatched to the relayer.
    pub attempts: u32,
}

// -----------------
// BatchJob
// -----------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: u64,
    pub business_id: String,
    pub product_id: String,
    pub status: BatchJobStatus,
    /// Fixed length after creation; only item statuses transition.
    pub items: Vec<BatchItem>,
    pub options: BatchOptions,
    pub has_web3: bool,
    pub should_auto_transfer: bool,
    pub brand_wallet: Option<String>,
    pub metadata: Option<String>,
    pub created_at_ms: u64,
    pub estimated_completion_ms: u64,
    pub completed_at_ms: Option<u64>,
}

impl BatchJob {
    pub fn succeeded_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == BatchItemStatus::Succeeded)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == BatchItemStatus::Failed)
            .count()
    }
}

// -----------------
// Requests and summaries
// -----------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Wallet the minted token is auto-transferred to.
    pub brand_wallet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBatchJobRequest {
    pub product_id: String,
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub batch_options: Option<BatchOptions>,
    /// Plan key; resolved via the subscription lookup when absent.
    #[serde(default)]
    pub plan_level: Option<String>,
    #[serde(default)]
    pub has_web3: bool,
    #[serde(default)]
    pub should_auto_transfer: bool,
    #[serde(default)]
    pub transfer_settings: Option<TransferSettings>,
    #[serde(default)]
    pub job_metadata: Option<String>,
}

/// Outcome of one retry pass over a job's failed items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOutcome {
    pub retried: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Aggregate over a tenant's historical jobs. The success rate counts
/// items that reached a terminal state, so a cancelled job contributes
/// its succeeded items while its never-dispatched ones stay out of the
/// denominator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub completed_jobs: usize,
    pub partially_failed_jobs: usize,
    pub cancelled_jobs: usize,
    pub items_succeeded: usize,
    pub items_failed: usize,
    /// `items_succeeded / (items_succeeded + items_failed)`, 1.0 when no
    /// item has reached a terminal state yet.
    pub success_rate: f64,
}
