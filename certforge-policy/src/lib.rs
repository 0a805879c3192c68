pub mod gas;
pub mod health;
pub mod limits;

pub use gas::estimate_mint_cost_wei;
pub use health::{
    evaluate_transfer_health, evaluate_transfer_health_at, ownership_status,
    HealthStatus, OwnershipStatus, TransferHealth,
};
pub use limits::{
    batch_priority, calculate_batch_duration_secs, plan_limits, BatchPriority,
    PlanLimits, PlanTier,
};
