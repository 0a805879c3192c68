use certforge_chain::ChainRelayerError;
use certforge_core::CertificateStoreError;
use thiserror::Error;

use crate::persist::error::BatchPersistError;
use crate::types::BatchJobStatus;

pub type BatchServiceResult<T> = Result<T, BatchServiceError>;

#[derive(Error, Debug)]
pub enum BatchServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("batch of {requested} exceeds plan limit of {max}")]
    LimitExceeded { requested: usize, max: u32 },

    #[error("batch job not found")]
    NotFound,

    #[error("ChainRelayerError: {0} ({0:?})")]
    Chain(#[from] ChainRelayerError),

    #[error("relayer call timed out")]
    Timeout,

    #[error("certificate already exists for this product and recipient")]
    Duplicate,

    #[error("CertificateStoreError: {0} ({0:?})")]
    Store(#[from] CertificateStoreError),

    #[error("BatchPersistError: {0} ({0:?})")]
    Persist(#[from] BatchPersistError),

    #[error("operation not valid while job is {0}")]
    InvalidJobState(BatchJobStatus),
}
