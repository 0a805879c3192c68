use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use certforge_core::{Certificate, CertificateStatus};
use serde::{Deserialize, Serialize};

/// Points deducted per transfer attempt beyond the first.
const ATTEMPT_PENALTY: u8 = 15;
/// Points deducted once a transfer has stalled.
const STALLED_PENALTY: u8 = 25;
/// Ceiling applied to the score of a failed transfer.
const FAILED_SCORE_CAP: u8 = 20;
/// A certificate that has not reached the brand wallet within this window
/// counts as stalled.
const STALLED_THRESHOLD_MS: u64 = 24 * 60 * 60 * 1_000;

// -----------------
// HealthStatus
// -----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    AtRisk,
    Failed,
}

impl HealthStatus {
    fn from_score(score: u8) -> Self {
        match score {
            80..=100 => HealthStatus::Healthy,
            50..=79 => HealthStatus::Degraded,
            21..=49 => HealthStatus::AtRisk,
            _ => HealthStatus::Failed,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use HealthStatus::*;
        let s = match self {
            Healthy => "healthy",
            Degraded => "degraded",
            AtRisk => "at_risk",
            Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Derived transfer health of one certificate. Recomputed on demand from
/// the current certificate snapshot, never cached beyond a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferHealth {
    pub score: u8,
    pub status: HealthStatus,
    pub issues: Vec<String>,
}

/// Evaluates transfer health against the current wall clock.
pub fn evaluate_transfer_health(cert: &Certificate) -> TransferHealth {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(cert.created_at_ms);
    evaluate_transfer_health_at(cert, now_ms)
}

/// Deterministic core of the evaluation, taking the observation time.
pub fn evaluate_transfer_health_at(
    cert: &Certificate,
    now_ms: u64,
) -> TransferHealth {
    let mut score: u8 = 100;
    let mut issues = Vec::new();

    if cert.transfer_attempts > 1 {
        let extra = (cert.transfer_attempts - 1).min(u8::MAX as u32) as u8;
        score = score.saturating_sub(extra.saturating_mul(ATTEMPT_PENALTY));
        issues.push(format!(
            "{} transfer attempts",
            cert.transfer_attempts
        ));
    }

    let delivered = cert.status == CertificateStatus::TransferredToBrand;
    let elapsed = now_ms.saturating_sub(cert.created_at_ms);
    if !delivered && elapsed > STALLED_THRESHOLD_MS {
        score = score.saturating_sub(STALLED_PENALTY);
        issues.push("stalled".to_string());
    }

    if cert.transfer_failed {
        score = score.min(FAILED_SCORE_CAP);
        issues.push("transfer_failed".to_string());
        return TransferHealth {
            score,
            status: HealthStatus::Failed,
            issues,
        };
    }

    TransferHealth {
        score,
        status: HealthStatus::from_score(score),
        issues,
    }
}

// -----------------
// OwnershipStatus
// -----------------

/// Who currently holds the certificate's token, derived purely from the
/// certificate status fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipStatus {
    /// Minted (or not yet minted) and still in the relayer wallet.
    RelayerHeld,
    /// The brand wallet holds the token.
    BrandHeld,
    TransferInProgress,
    Failed,
}

pub fn ownership_status(cert: &Certificate) -> OwnershipStatus {
    use CertificateStatus::*;
    if cert.transfer_failed {
        return OwnershipStatus::Failed;
    }
    match cert.status {
        TransferredToBrand => OwnershipStatus::BrandHeld,
        PendingTransfer => OwnershipStatus::TransferInProgress,
        TransferFailed => OwnershipStatus::Failed,
        Pending | Minted | Revoked => OwnershipStatus::RelayerHeld,
    }
}
