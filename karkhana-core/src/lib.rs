pub mod repository;
pub mod workflow;
pub mod memory;

use karkhana_order::WorkflowError;
use karkhana_stones::StockError;
use repository::RepositoryError;

pub use memory::InMemoryWorkshop;
pub use workflow::{IssueStageCommand, StoneRequest, WorkshopService};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("Storage error: {0}")]
    Storage(#[source] RepositoryError),
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => ServiceError::NotFound(what),
            RepositoryError::Conflict(msg) => ServiceError::Conflict(msg),
            other => ServiceError::Storage(other),
        }
    }
}

impl From<StockError> for ServiceError {
    fn from(err: StockError) -> Self {
        match err {
            StockError::NotFound(id) => ServiceError::NotFound(format!("Stone lot {}", id)),
            StockError::DuplicateLotCode(_) | StockError::InsufficientStock { .. } => ServiceError::Conflict(err.to_string()),
            StockError::InvalidQuantity(_) | StockError::Invalid(_) => ServiceError::Validation(err.to_string()),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
