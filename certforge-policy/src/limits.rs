use std::fmt;

use certforge_core::BatchOptions;
use serde::{Deserialize, Serialize};

// Enterprise is effectively unbounded but uses explicit sentinels rather
// than `u32::MAX` so downstream arithmetic cannot overflow.
const ENTERPRISE_MAX_BATCH_SIZE: u32 = 100_000;
const ENTERPRISE_MAX_CONCURRENT: u32 = 25;

/// Fixed per-item latency for mint confirmation on chain.
const CHAIN_CONFIRMATION_SECS: u64 = 3;

// -----------------
// PlanTier
// -----------------

/// Subscription tiers. Unknown plan keys parse to [`PlanTier::Foundation`],
/// the most conservative set of limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Foundation,
    Growth,
    Premium,
    Enterprise,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        use PlanTier::*;
        match self {
            Foundation => "foundation",
            Growth => "growth",
            Premium => "premium",
            Enterprise => "enterprise",
        }
    }

    pub fn from_key(key: &str) -> Self {
        use PlanTier::*;
        match key {
            "growth" => Growth,
            "premium" => Premium,
            "enterprise" => Enterprise,
            _ => Foundation,
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// -----------------
// PlanLimits
// -----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub max_batch_size: u32,
    pub max_concurrent: u32,
    /// `None` means unlimited.
    pub transfers_per_month: Option<u32>,
}

pub fn plan_limits(plan: PlanTier) -> PlanLimits {
    use PlanTier::*;
    match plan {
        Foundation => PlanLimits {
            max_batch_size: 50,
            max_concurrent: 2,
            transfers_per_month: Some(100),
        },
        Growth => PlanLimits {
            max_batch_size: 200,
            max_concurrent: 5,
            transfers_per_month: Some(1_000),
        },
        Premium => PlanLimits {
            max_batch_size: 1_000,
            max_concurrent: 10,
            transfers_per_month: Some(10_000),
        },
        Enterprise => PlanLimits {
            max_batch_size: ENTERPRISE_MAX_BATCH_SIZE,
            max_concurrent: ENTERPRISE_MAX_CONCURRENT,
            transfers_per_month: None,
        },
    }
}

// -----------------
// BatchPriority
// -----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPriority {
    Standard,
    Priority,
    Urgent,
}

pub fn batch_priority(plan: PlanTier) -> BatchPriority {
    use PlanTier::*;
    match plan {
        Foundation | Growth => BatchPriority::Standard,
        Premium => BatchPriority::Priority,
        Enterprise => BatchPriority::Urgent,
    }
}

// -----------------
// Duration estimate
// -----------------

/// Estimated wall-clock seconds for a batch: pacing delay spread over the
/// concurrency window, plus per-item chain confirmation latency when the
/// tenant mints on chain. Monotonic non-decreasing in `recipient_count`.
pub fn calculate_batch_duration_secs(
    recipient_count: u32,
    options: &BatchOptions,
    has_web3: bool,
) -> u64 {
    if recipient_count == 0 {
        return 0;
    }
    let count = recipient_count as u64;
    let lanes = options.max_concurrent.max(1) as u64;

    let pacing_ms = options.delay_between_certs_ms.saturating_mul(count) / lanes;
    let mut secs = pacing_ms.div_ceil(1_000);
    if has_web3 {
        let chain_secs = CHAIN_CONFIRMATION_SECS.saturating_mul(count) / lanes;
        secs = secs.saturating_add(chain_secs.max(1));
    }
    secs
}
