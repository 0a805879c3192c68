use async_trait::async_trait;
use thiserror::Error;

use certforge_core::Recipient;

#[cfg(any(test, feature = "dev-context-only-utils"))]
pub mod stub;

pub type ChainRelayerResult<T> = Result<T, ChainRelayerError>;

#[derive(Error, Debug, Clone)]
pub enum ChainRelayerError {
    #[error("relayer rejected the transaction: {0}")]
    Rejected(String),

    #[error("transaction reverted on chain: {0} (tx: {1})")]
    Reverted(String, String),

    #[error("relayer unreachable: {0}")]
    Unreachable(String),
}

/// Proof of a confirmed mint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintReceipt {
    pub token_id: String,
    pub tx_hash: String,
}

/// Proof of a submitted ownership transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub tx_hash: String,
}

/// Submits blockchain transactions on behalf of the platform. One call is
/// one submission; the relayer performs no retries visible to callers.
/// The wallet signer behind it is a shared, rate-limited resource, so
/// callers bound their own concurrency.
#[async_trait]
pub trait ChainRelayer: Send + Sync {
    /// Mints one certificate token for the recipient. The token stays in
    /// the relayer-held wallet until transferred.
    async fn mint(
        &self,
        recipient: &Recipient,
        product_id: &str,
        metadata: &str,
    ) -> ChainRelayerResult<MintReceipt>;

    /// Submits an ownership transfer of a minted token to the brand
    /// wallet.
    async fn transfer(
        &self,
        token_id: &str,
        to_wallet: &str,
    ) -> ChainRelayerResult<TransferReceipt>;
}
