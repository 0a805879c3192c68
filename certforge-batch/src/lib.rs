pub mod config;
pub mod error;
pub mod persist;
mod processor;
mod service;
pub mod types;

#[cfg(any(test, feature = "dev-context-only-utils"))]
pub mod stubs;

pub use config::BatchServiceConfig;
pub use error::{BatchServiceError, BatchServiceResult};
pub use processor::BatchProcessor;
pub use service::BatchService;
