pub mod db;
pub mod error;
pub(crate) mod utils;

pub use db::{BatchDb, NewBatchItem, NewBatchJob};
pub use error::{BatchPersistError, BatchPersistResult};
