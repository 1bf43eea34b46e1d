use crate::core::{DEFAULT_VERSION_FIELD, ID_ELEMENT, SagaType};
use crate::resolver::CollectionResolver;
use std::time::Duration;

/// Saga persistence configuration
///
/// Built once at startup and shared by the session factory and the persister.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Database holding one collection per saga type
    pub database: String,

    /// Element name of the hidden optimistic-concurrency marker
    pub version_field: String,

    /// Wrap every session in a database transaction
    pub use_transactions: bool,

    /// How long a session transaction may stay open before commit fails
    pub transaction_timeout: Duration,

    /// Saga type -> collection name
    pub collections: CollectionResolver,
}

impl PersistenceConfig {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            version_field: DEFAULT_VERSION_FIELD.to_string(),
            use_transactions: true,
            transaction_timeout: Duration::from_secs(60),
            collections: CollectionResolver::default(),
        }
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    pub fn version_field(mut self, field: &str) -> Self {
        self.version_field = field.to_string();
        self
    }

    /// Enable or disable transactional sessions.
    ///
    /// Must be disabled explicitly against servers without transaction
    /// support; the session factory refuses to start otherwise.
    pub fn use_transactions(mut self, enabled: bool) -> Self {
        self.use_transactions = enabled;
        self
    }

    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Replace the default lowercase-type-name collection naming.
    pub fn collection_naming<F>(mut self, convention: F) -> Self
    where
        F: Fn(SagaType) -> String + Send + Sync + 'static,
    {
        self.collections = CollectionResolver::new(convention);
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.database.is_empty() {
            return Err("Database name cannot be empty".to_string());
        }

        if self.version_field.is_empty() {
            return Err("Version field name cannot be empty".to_string());
        }

        if self.version_field == ID_ELEMENT {
            return Err(format!("Version field cannot be the reserved '{}' element", ID_ELEMENT));
        }

        if self.transaction_timeout.is_zero() {
            return Err("transaction_timeout must be > 0".to_string());
        }

        Ok(())
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self::new("sagas")
    }
}
