use livescore_engine::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid worker configuration. {0}")]
    ConfigurationError(String),
    #[error("Could not initialize the worker. {0}")]
    InitializeError(String),
    #[error("A storage error occurred in the worker. {0}")]
    StoreError(#[from] StoreError),
}
