// ============================================================================
// Document Store Driver Contract
// ============================================================================
//
// The saga store talks to the database only through these traits. A driver
// must provide:
// - session-scoped transactions
// - unique index creation where creating an existing index is a no-op
// - filtered updates with an atomic field increment
// - duplicate-key failures distinguishable from other write failures
//
// ============================================================================

pub mod memory;

use crate::core::Document;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use memory::InMemoryDocumentStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Duplicate key in '{namespace}' on field '{field}'")]
    DuplicateKey { namespace: String, field: String },

    #[error("Write conflict in '{namespace}': document is locked by another transaction")]
    WriteConflict { namespace: String },

    #[error("Transactions not supported: {0}")]
    TransactionsNotSupported(String),

    #[error("No transaction in progress")]
    NoTransaction,

    #[error("Transaction already in progress")]
    TransactionInProgress,

    #[error("Transaction exceeded its time limit of {0:?}")]
    TransactionTimedOut(Duration),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

impl<T> From<std::sync::PoisonError<T>> for DriverError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Fully qualified collection address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Conjunction of field equality predicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.clauses.push((field.into(), value));
        self
    }

    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, expected)| document.get(field) == Some(expected))
    }
}

/// Field assignments plus atomic integer increments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSpec {
    set: Vec<(String, Value)>,
    inc: Vec<(String, i64)>,
}

impl UpdateSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.set.push((field.into(), value));
        self
    }

    pub fn inc(mut self, field: impl Into<String>, by: i64) -> Self {
        self.inc.push((field.into(), by));
        self
    }

    pub fn assignments(&self) -> &[(String, Value)] {
        &self.set
    }

    pub fn increments(&self) -> &[(String, i64)] {
        &self.inc
    }

    /// Applies the update to a document in place.
    ///
    /// Increments treat a missing or non-integer field as zero.
    pub fn apply(&self, document: &mut Document) {
        for (field, value) in &self.set {
            document.insert(field.clone(), value.clone());
        }
        for (field, by) in &self.inc {
            let current = document.get(field).and_then(Value::as_i64).unwrap_or(0);
            document.insert(field.clone(), Value::from(current + by));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Upper bound on how long the transaction may stay open before commit.
    pub max_duration: Duration,
}

/// Connection-level handle shared by every session.
#[async_trait]
pub trait DocumentClient: Send + Sync {
    async fn start_session(&self) -> DriverResult<Box<dyn DriverSession>>;

    /// Creates a unique ascending index on `field`.
    ///
    /// Creating an index that already exists succeeds. Existing documents
    /// that already violate uniqueness fail with `DuplicateKey`.
    async fn create_unique_index(&self, namespace: &Namespace, field: &str) -> DriverResult<()>;
}

/// One logical database session.
///
/// Dropping a session with a transaction in progress must abort that
/// transaction and release the session's resources.
#[async_trait]
pub trait DriverSession: Send + Sync {
    fn start_transaction(&mut self, options: TransactionOptions) -> DriverResult<()>;

    fn in_transaction(&self) -> bool;

    async fn commit_transaction(&mut self) -> DriverResult<()>;

    async fn abort_transaction(&mut self) -> DriverResult<()>;

    async fn insert_one(&mut self, namespace: &Namespace, document: Document) -> DriverResult<()>;

    /// Returns the first document matching `filter`, if any.
    async fn find_one(
        &mut self,
        namespace: &Namespace,
        filter: &Filter,
    ) -> DriverResult<Option<Document>>;

    /// Applies `update` to the first document matching `filter` and returns
    /// the document after the update. No upsert.
    async fn find_one_and_update(
        &mut self,
        namespace: &Namespace,
        filter: &Filter,
        update: &UpdateSpec,
    ) -> DriverResult<Option<Document>>;

    /// Deletes the first document matching `filter` and returns the count.
    async fn delete_one(&mut self, namespace: &Namespace, filter: &Filter) -> DriverResult<u64>;
}
