// ============================================================================
// Saga DocStore Library
// ============================================================================
//
// Persists long-running saga state as versioned documents:
// - one collection per saga type, one document per saga instance
// - optimistic concurrency through a hidden version element
// - unique indexes on correlation properties, created lazily
// - every operation runs inside a per-unit-of-work transactional session
//
// ============================================================================

pub mod core;
pub mod driver;
pub mod index_cache;
pub mod prelude;
pub mod resolver;
pub mod saga;
pub mod session;

// Re-export main types for convenience
pub use crate::core::{DEFAULT_VERSION_FIELD, Document, ID_ELEMENT, Result, SagaData, SagaError, SagaType};
pub use driver::{
    DocumentClient, DriverError, DriverResult, DriverSession, Filter, InMemoryDocumentStore,
    Namespace, TransactionOptions, UpdateSpec,
};
pub use index_cache::IndexCache;
pub use resolver::{
    CollectionNamingConvention, CollectionResolver, FieldMap, FieldResolver, StaticFieldResolver,
};
pub use saga::SagaPersister;
pub use session::{
    PersistenceConfig, SessionFactory, SessionId, SessionState, TransactionalSession, VersionCache,
};
