use async_trait::async_trait;
use thiserror::Error;

use crate::certificate::{Certificate, CertificateStatus};
use crate::recipient::Recipient;

pub type CertificateStoreResult<T> = Result<T, CertificateStoreError>;

#[derive(Error, Debug)]
pub enum CertificateStoreError {
    #[error("certificate not found: '{0}'")]
    NotFound(String),

    #[error(
        "certificate already exists for product '{product_id}' \
         and recipient '{recipient}'"
    )]
    Duplicate {
        product_id: String,
        recipient: String,
    },

    #[error("storage backend error: {0}")]
    Storage(String),
}

/// Fields the orchestrator supplies when creating a certificate record;
/// the store assigns the id and timestamps.
#[derive(Debug, Clone)]
pub struct NewCertificate {
    pub business_id: String,
    pub product_id: String,
    pub recipient: Recipient,
    pub token_id: Option<String>,
    pub status: CertificateStatus,
}

/// Persistence seam for certificate records. Backed by the document store
/// in production; tests use an in-memory stub.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    async fn create(
        &self,
        cert: NewCertificate,
    ) -> CertificateStoreResult<Certificate>;

    async fn get(&self, id: &str) -> CertificateStoreResult<Certificate>;

    /// Looks up an existing certificate for a product + recipient pair,
    /// used for duplicate detection before minting.
    async fn find_by_product_and_recipient(
        &self,
        business_id: &str,
        product_id: &str,
        recipient: &Recipient,
    ) -> CertificateStoreResult<Option<Certificate>>;

    async fn update_status(
        &self,
        id: &str,
        status: CertificateStatus,
    ) -> CertificateStoreResult<()>;

    /// Increments the certificate's transfer attempt counter.
    async fn record_transfer_attempt(
        &self,
        id: &str,
    ) -> CertificateStoreResult<()>;

    /// Flags the certificate's last transfer as permanently failed.
    async fn set_transfer_failed(&self, id: &str)
        -> CertificateStoreResult<()>;

    /// Whether the given business owns the given product. Creation
    /// refuses to mint against a foreign product.
    async fn business_owns_product(
        &self,
        business_id: &str,
        product_id: &str,
    ) -> CertificateStoreResult<bool>;
}

/// Resolves the subscription plan key for a tenant when the caller does
/// not pass one explicitly.
#[async_trait]
pub trait SubscriptionPlanLookup: Send + Sync {
    async fn plan_key(
        &self,
        business_id: &str,
    ) -> CertificateStoreResult<String>;
}
