use std::fmt;

use serde::{Deserialize, Serialize};

use crate::recipient::Recipient;

// -----------------
// CertificateStatus
// -----------------

/// Lifecycle of a certificate's on-chain token.
///
/// `Pending -> Minted -> PendingTransfer -> TransferredToBrand | TransferFailed`,
/// with `Revoked` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    /// Created, mint not yet confirmed.
    Pending,
    /// The token exists on chain, held by the relayer wallet.
    Minted,
    /// A transfer to the brand wallet has been submitted.
    PendingTransfer,
    /// The brand wallet holds the token.
    TransferredToBrand,
    /// The last transfer submission failed.
    TransferFailed,
    /// Administratively revoked.
    Revoked,
}

impl CertificateStatus {
    pub fn as_str(&self) -> &'static str {
        use CertificateStatus::*;
        match self {
            Pending => "pending",
            Minted => "minted",
            PendingTransfer => "pending_transfer",
            TransferredToBrand => "transferred_to_brand",
            TransferFailed => "transfer_failed",
            Revoked => "revoked",
        }
    }

    /// Whether the mint has been confirmed, i.e. a token id must exist.
    pub fn reached_minted(&self) -> bool {
        use CertificateStatus::*;
        match self {
            Pending => false,
            Minted | PendingTransfer | TransferredToBrand
            | TransferFailed => true,
            // A revoked certificate may or may not carry a token
            Revoked => false,
        }
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for CertificateStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        use CertificateStatus::*;
        match value {
            "pending" => Ok(Pending),
            "minted" => Ok(Minted),
            "pending_transfer" => Ok(PendingTransfer),
            "transferred_to_brand" => Ok(TransferredToBrand),
            "transfer_failed" => Ok(TransferFailed),
            "revoked" => Ok(Revoked),
            _ => Err(format!("invalid certificate status: '{}'", value)),
        }
    }
}

// -----------------
// Certificate
// -----------------

/// A digital certificate record as persisted by the certificate store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: String,
    /// Owning tenant; all queries are scoped to it.
    pub business_id: String,
    pub product_id: String,
    pub recipient: Recipient,
    /// Set iff the status reached at least [`CertificateStatus::Minted`].
    pub token_id: Option<String>,
    pub status: CertificateStatus,
    /// Number of transfer submissions for this certificate.
    pub transfer_attempts: u32,
    /// The last transfer permanently failed.
    pub transfer_failed: bool,
    /// Milliseconds since the unix epoch.
    pub created_at_ms: u64,
}

impl Certificate {
    /// Checks the token-iff-minted invariant on a stored snapshot.
    pub fn token_invariant_holds(&self) -> bool {
        if self.status.reached_minted() {
            self.token_id.is_some()
        } else if self.status == CertificateStatus::Revoked {
            true
        } else {
            self.token_id.is_none()
        }
    }
}
