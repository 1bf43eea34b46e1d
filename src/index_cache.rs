// ============================================================================
// Correlation Index Cache
// ============================================================================
//
// Remembers which saga types already have their correlation unique index so
// that `save` issues the index creation call at most once per type. Entries
// are only ever added. Losing the cache costs one redundant (idempotent)
// create-index call per type.
//
// ============================================================================

use lazy_static::lazy_static;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

lazy_static! {
    static ref GLOBAL_INDEX_CACHE: Arc<IndexCache> = Arc::new(IndexCache::new());
}

#[derive(Debug, Default)]
pub struct IndexCache {
    created: RwLock<HashSet<(String, String)>>,
}

impl IndexCache {
    /// Process-wide cache shared by every persister that does not bring its own.
    pub fn global() -> &'static Arc<IndexCache> {
        &GLOBAL_INDEX_CACHE
    }

    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, database: &str, saga_type: &str) -> bool {
        match self.created.read() {
            Ok(created) => created.contains(&(database.to_string(), saga_type.to_string())),
            // A poisoned cache only means one more idempotent index call.
            Err(_) => false,
        }
    }

    /// Records the index as created. Returns `true` if this call added it.
    pub fn mark_created(&self, database: &str, saga_type: &str) -> bool {
        match self.created.write() {
            Ok(mut created) => created.insert((database.to_string(), saga_type.to_string())),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.created.read().map(|created| created.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
