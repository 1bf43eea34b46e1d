use crate::driver::DriverError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SagaError {
    #[error("Concurrency conflict: saga '{saga_type}' with id '{id}' was modified or removed by another writer")]
    ConcurrencyConflict { saga_type: String, id: String },

    #[error("Duplicate correlation: saga '{saga_type}' with id '{id}' collides on unique field '{field}'")]
    DuplicateCorrelation {
        saga_type: String,
        field: String,
        id: String,
    },

    #[error("Property '{property}' not found in the field map of saga '{saga_type}'")]
    PropertyNotFound { saga_type: String, property: String },

    #[error(
        "Transactions are not supported by the database server/cluster ({reason}). \
         Disable support for transactions by calling PersistenceConfig::use_transactions(false)"
    )]
    TransactionUnsupported { reason: String },

    #[error("Update of saga '{saga_type}' with id '{id}' requires a prior get or save in the same session")]
    SessionMisuse { saga_type: String, id: String },

    #[error("Session is not open (state: {state})")]
    SessionNotOpen { state: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl SagaError {
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, SagaError::ConcurrencyConflict { .. })
    }

    pub fn is_duplicate_correlation(&self) -> bool {
        matches!(self, SagaError::DuplicateCorrelation { .. })
    }

    /// Errors that point at a defect in the caller or its configuration
    /// rather than at a runtime condition worth retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SagaError::PropertyNotFound { .. }
                | SagaError::TransactionUnsupported { .. }
                | SagaError::SessionMisuse { .. }
                | SagaError::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SagaError>;

impl From<serde_json::Error> for SagaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
