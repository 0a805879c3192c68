use thiserror::Error;

pub type BatchPersistResult<T> = Result<T, BatchPersistError>;

#[derive(Error, Debug)]
pub enum BatchPersistError {
    #[error("RusqliteError: '{0}' ({0:?})")]
    RusqliteError(#[from] rusqlite::Error),

    #[error("Invalid batch job status: '{0}'")]
    InvalidJobStatus(String),

    #[error("Invalid batch item status: '{0}'")]
    InvalidItemStatus(String),

    #[error("Invalid error kind: '{0}'")]
    InvalidErrorKind(String),

    #[error("Invalid contact method: '{0}'")]
    InvalidContactMethod(String),

    #[error("Batch job not found: {0}")]
    JobNotFound(u64),
}
