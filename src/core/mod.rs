pub mod error;
pub mod types;

pub use error::{Result, SagaError};
pub use types::{DEFAULT_VERSION_FIELD, Document, ID_ELEMENT, SagaData, SagaType};
