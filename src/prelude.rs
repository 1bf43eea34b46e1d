//! Entry points grouped by how close to the database they sit.
//!
//! `saga` covers what a message handler needs. `driver` is the surface for
//! plugging in a different document database.

pub mod saga {
    //! Handler-level surface.
    //!
    //! Typical usage:
    //! - build a `SessionFactory` at startup,
    //! - one `TransactionalSession` per incoming message,
    //! - `SagaPersister` for save / get / update / complete.
    pub use crate::{
        FieldMap, PersistenceConfig, Result, SagaData, SagaError, SagaPersister, SessionFactory,
        StaticFieldResolver, TransactionalSession,
    };
}

pub mod driver {
    //! Contract a document database must fulfil, plus the in-process store.
    pub use crate::driver::{
        DocumentClient, DriverError, DriverResult, DriverSession, Filter, InMemoryDocumentStore,
        Namespace, TransactionOptions, UpdateSpec,
    };
}
