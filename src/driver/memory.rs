// ============================================================================
// In-Memory Document Store
// ============================================================================
//
// Reference implementation of the driver contract. Each document slot keeps
// its last committed image plus at most one pending image owned by an open
// transaction:
// - the owner reads and writes the pending image
// - every other reader sees the committed image (read committed)
// - every other writer gets a write conflict until the owner finishes
//
// Commit promotes pending images, abort (or dropping the session) discards
// them.
//
// ============================================================================

use super::{
    DocumentClient, DriverError, DriverResult, DriverSession, Filter, Namespace,
    TransactionOptions, UpdateSpec,
};
use crate::core::{Document, ID_ELEMENT};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TxnId(u64);

impl TxnId {
    fn new() -> Self {
        TxnId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Debug)]
struct Pending {
    owner: TxnId,
    image: Option<Document>,
}

#[derive(Debug, Default)]
struct Entry {
    committed: Option<Document>,
    pending: Option<Pending>,
}

impl Entry {
    fn visible_to(&self, txn: Option<TxnId>) -> Option<&Document> {
        match (&self.pending, txn) {
            (Some(pending), Some(txn)) if pending.owner == txn => pending.image.as_ref(),
            _ => self.committed.as_ref(),
        }
    }

    fn owned_by(&self, txn: Option<TxnId>) -> bool {
        matches!((&self.pending, txn), (Some(pending), Some(txn)) if pending.owner == txn)
    }

    fn locked_by_other(&self, txn: Option<TxnId>) -> bool {
        matches!(&self.pending, Some(pending) if Some(pending.owner) != txn)
    }

    /// Every image a unique index has to account for.
    fn images(&self) -> impl Iterator<Item = &Document> {
        self.committed.iter().chain(
            self.pending
                .as_ref()
                .and_then(|pending| pending.image.as_ref()),
        )
    }

    fn is_vacant(&self) -> bool {
        self.committed.is_none() && self.pending.is_none()
    }
}

#[derive(Debug, Default)]
struct CollectionData {
    entries: BTreeMap<String, Entry>,
    unique_fields: BTreeSet<String>,
}

impl CollectionData {
    /// Slots this transaction already rewrote only count with their pending
    /// image; every other slot counts with all of its images.
    fn check_unique(
        &self,
        namespace: &Namespace,
        key: &str,
        document: &Document,
        txn: Option<TxnId>,
    ) -> DriverResult<()> {
        for field in &self.unique_fields {
            let Some(value) = document.get(field) else {
                continue;
            };
            let collides = self
                .entries
                .iter()
                .filter(|(other_key, _)| other_key.as_str() != key)
                .any(|(_, entry)| {
                    if entry.owned_by(txn) {
                        entry
                            .visible_to(txn)
                            .is_some_and(|image| image.get(field) == Some(value))
                    } else {
                        entry.images().any(|image| image.get(field) == Some(value))
                    }
                });
            if collides {
                return Err(DriverError::DuplicateKey {
                    namespace: namespace.to_string(),
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }

    fn first_match(&self, txn: Option<TxnId>, filter: &Filter) -> Option<String> {
        self.entries
            .iter()
            .find(|(_, entry)| {
                entry
                    .visible_to(txn)
                    .is_some_and(|document| filter.matches(document))
            })
            .map(|(key, _)| key.clone())
    }
}

struct StoreInner {
    collections: RwLock<HashMap<Namespace, CollectionData>>,
    transactions_supported: bool,
}

impl StoreInner {
    fn finish(&self, txn: &ActiveTransaction, commit: bool) -> DriverResult<()> {
        let mut collections = self.collections.write()?;
        for (namespace, key) in &txn.touched {
            let Some(collection) = collections.get_mut(namespace) else {
                continue;
            };
            let Some(entry) = collection.entries.get_mut(key) else {
                continue;
            };
            match entry.pending.take() {
                Some(pending) if pending.owner == txn.id => {
                    if commit {
                        entry.committed = pending.image;
                    }
                }
                other => entry.pending = other,
            }
            if entry.is_vacant() {
                collection.entries.remove(key);
            }
        }
        Ok(())
    }
}

/// Shared in-process document database.
///
/// Cloning is cheap; clones address the same data.
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    inner: Arc<StoreInner>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    /// Creates a store that supports multi-document transactions.
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Creates a store that behaves like a standalone server: starting a
    /// transaction fails with `TransactionsNotSupported`.
    pub fn without_transactions() -> Self {
        Self::build(false)
    }

    fn build(transactions_supported: bool) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                collections: RwLock::new(HashMap::new()),
                transactions_supported,
            }),
        }
    }

    /// Number of committed documents in a collection.
    pub fn document_count(&self, namespace: &Namespace) -> DriverResult<usize> {
        let collections = self.inner.collections.read()?;
        Ok(collections
            .get(namespace)
            .map(|c| c.entries.values().filter(|e| e.committed.is_some()).count())
            .unwrap_or(0))
    }

    /// Committed image of the document with the given `_id`.
    pub fn committed_document(
        &self,
        namespace: &Namespace,
        id: &Value,
    ) -> DriverResult<Option<Document>> {
        let collections = self.inner.collections.read()?;
        Ok(collections
            .get(namespace)
            .and_then(|c| c.entries.get(&id_key(id)))
            .and_then(|e| e.committed.clone()))
    }

    pub fn unique_index_fields(&self, namespace: &Namespace) -> DriverResult<Vec<String>> {
        let collections = self.inner.collections.read()?;
        Ok(collections
            .get(namespace)
            .map(|c| c.unique_fields.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl DocumentClient for InMemoryDocumentStore {
    async fn start_session(&self) -> DriverResult<Box<dyn DriverSession>> {
        Ok(Box::new(MemorySession {
            inner: Arc::clone(&self.inner),
            txn: None,
        }))
    }

    async fn create_unique_index(&self, namespace: &Namespace, field: &str) -> DriverResult<()> {
        let mut collections = self.inner.collections.write()?;
        let collection = collections.entry(namespace.clone()).or_default();
        if collection.unique_fields.contains(field) {
            return Ok(());
        }

        let mut seen = Vec::new();
        for image in collection.entries.values().flat_map(Entry::images) {
            if let Some(value) = image.get(field) {
                if seen.contains(&value) {
                    return Err(DriverError::DuplicateKey {
                        namespace: namespace.to_string(),
                        field: field.to_string(),
                    });
                }
                seen.push(value);
            }
        }

        collection.unique_fields.insert(field.to_string());
        Ok(())
    }
}

struct ActiveTransaction {
    id: TxnId,
    started_at: Instant,
    options: TransactionOptions,
    touched: BTreeSet<(Namespace, String)>,
}

impl ActiveTransaction {
    fn expired(&self) -> bool {
        self.started_at.elapsed() > self.options.max_duration
    }
}

struct MemorySession {
    inner: Arc<StoreInner>,
    txn: Option<ActiveTransaction>,
}

impl MemorySession {
    fn txn_id(&self) -> Option<TxnId> {
        self.txn.as_ref().map(|txn| txn.id)
    }

    /// Stages `image` for the slot `key`: pending under a transaction,
    /// committed immediately otherwise.
    fn write(&mut self, entry: &mut Entry, namespace: &Namespace, key: &str, image: Option<Document>) {
        match self.txn.as_mut() {
            Some(txn) => {
                entry.pending = Some(Pending {
                    owner: txn.id,
                    image,
                });
                txn.touched.insert((namespace.clone(), key.to_string()));
            }
            None => entry.committed = image,
        }
    }

    fn finish(&mut self, commit: bool) -> DriverResult<()> {
        let txn = self.txn.take().ok_or(DriverError::NoTransaction)?;
        if txn.expired() {
            self.inner.finish(&txn, false)?;
            return Err(DriverError::TransactionTimedOut(txn.options.max_duration));
        }
        self.inner.finish(&txn, commit)
    }
}

#[async_trait]
impl DriverSession for MemorySession {
    fn start_transaction(&mut self, options: TransactionOptions) -> DriverResult<()> {
        if !self.inner.transactions_supported {
            return Err(DriverError::TransactionsNotSupported(
                "transaction numbers are only allowed on a replica set member or mongos".into(),
            ));
        }
        if self.txn.is_some() {
            return Err(DriverError::TransactionInProgress);
        }
        self.txn = Some(ActiveTransaction {
            id: TxnId::new(),
            started_at: Instant::now(),
            options,
            touched: BTreeSet::new(),
        });
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    async fn commit_transaction(&mut self) -> DriverResult<()> {
        self.finish(true)
    }

    async fn abort_transaction(&mut self) -> DriverResult<()> {
        self.finish(false)
    }

    async fn insert_one(&mut self, namespace: &Namespace, document: Document) -> DriverResult<()> {
        let key = document
            .get(ID_ELEMENT)
            .map(id_key)
            .ok_or_else(|| DriverError::Storage(format!("document has no '{}'", ID_ELEMENT)))?;
        let txn = self.txn_id();

        let inner = Arc::clone(&self.inner);
        let mut collections = inner.collections.write()?;
        let collection = collections.entry(namespace.clone()).or_default();

        if let Some(entry) = collection.entries.get(&key) {
            if entry.locked_by_other(txn) {
                return Err(DriverError::WriteConflict {
                    namespace: namespace.to_string(),
                });
            }
            if entry.visible_to(txn).is_some() {
                return Err(DriverError::DuplicateKey {
                    namespace: namespace.to_string(),
                    field: ID_ELEMENT.to_string(),
                });
            }
        }
        collection.check_unique(namespace, &key, &document, txn)?;

        let entry = collection.entries.entry(key.clone()).or_default();
        self.write(entry, namespace, &key, Some(document));
        Ok(())
    }

    async fn find_one(
        &mut self,
        namespace: &Namespace,
        filter: &Filter,
    ) -> DriverResult<Option<Document>> {
        let txn = self.txn_id();
        let collections = self.inner.collections.read()?;
        let Some(collection) = collections.get(namespace) else {
            return Ok(None);
        };
        Ok(collection
            .entries
            .values()
            .filter_map(|entry| entry.visible_to(txn))
            .find(|document| filter.matches(document))
            .cloned())
    }

    async fn find_one_and_update(
        &mut self,
        namespace: &Namespace,
        filter: &Filter,
        update: &UpdateSpec,
    ) -> DriverResult<Option<Document>> {
        let txn = self.txn_id();
        let inner = Arc::clone(&self.inner);
        let mut collections = inner.collections.write()?;
        let Some(collection) = collections.get_mut(namespace) else {
            return Ok(None);
        };
        let Some(key) = collection.first_match(txn, filter) else {
            return Ok(None);
        };

        let mut updated = {
            let Some(entry) = collection.entries.get(&key) else {
                return Ok(None);
            };
            if entry.locked_by_other(txn) {
                return Err(DriverError::WriteConflict {
                    namespace: namespace.to_string(),
                });
            }
            match entry.visible_to(txn) {
                Some(document) => document.clone(),
                None => return Ok(None),
            }
        };
        let id = updated.get(ID_ELEMENT).cloned();
        update.apply(&mut updated);
        if let Some(id) = id {
            updated.insert(ID_ELEMENT.to_string(), id);
        }
        collection.check_unique(namespace, &key, &updated, txn)?;

        if let Some(entry) = collection.entries.get_mut(&key) {
            self.write(entry, namespace, &key, Some(updated.clone()));
        }
        Ok(Some(updated))
    }

    async fn delete_one(&mut self, namespace: &Namespace, filter: &Filter) -> DriverResult<u64> {
        let txn = self.txn_id();
        let inner = Arc::clone(&self.inner);
        let mut collections = inner.collections.write()?;
        let Some(collection) = collections.get_mut(namespace) else {
            return Ok(0);
        };
        let Some(key) = collection.first_match(txn, filter) else {
            return Ok(0);
        };
        let Some(entry) = collection.entries.get_mut(&key) else {
            return Ok(0);
        };
        if entry.locked_by_other(txn) {
            return Err(DriverError::WriteConflict {
                namespace: namespace.to_string(),
            });
        }

        self.write(entry, namespace, &key, None);
        if entry.is_vacant() {
            collection.entries.remove(&key);
        }
        Ok(1)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            // Lock poisoning leaves the pending images in place; nothing
            // else can be done from Drop.
            let _ = self.inner.finish(&txn, false);
        }
    }
}

fn id_key(id: &Value) -> String {
    id.to_string()
}
