// ============================================================================
// Saga Persister
// ============================================================================
//
// save / get / update / complete against an open TransactionalSession.
//
// Stored document = saga fields + `_id` + version marker. The marker starts
// at 0 on save and is bumped by exactly 1 by every successful update, which
// only matches the document when its marker still equals the version this
// session observed. Nothing else writes the marker.
//
// ============================================================================

use super::codec;
use crate::core::{ID_ELEMENT, Result, SagaData, SagaError, SagaType};
use crate::driver::{DriverError, Filter, Namespace, UpdateSpec};
use crate::index_cache::IndexCache;
use crate::resolver::FieldResolver;
use crate::session::{TransactionalSession, cancellable};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct SagaPersister {
    fields: Arc<dyn FieldResolver>,
    index_cache: Arc<IndexCache>,
}

impl SagaPersister {
    /// Creates a persister that shares the process-wide index cache.
    pub fn new(fields: Arc<dyn FieldResolver>) -> Self {
        Self {
            fields,
            index_cache: Arc::clone(IndexCache::global()),
        }
    }

    pub fn with_index_cache(mut self, index_cache: Arc<IndexCache>) -> Self {
        self.index_cache = index_cache;
        self
    }

    pub fn index_cache(&self) -> &Arc<IndexCache> {
        &self.index_cache
    }

    /// Inserts a new saga with version 0.
    ///
    /// With a correlation property, the unique index on its element is
    /// created first (once per saga type). A saga whose correlation value or
    /// id is already stored fails with `DuplicateCorrelation`.
    pub async fn save<T: SagaData>(
        &self,
        session: &mut TransactionalSession,
        saga: &T,
        correlation_property: Option<&str>,
    ) -> Result<()> {
        let saga_type = T::saga_type();
        let namespace = session.namespace_for(saga_type)?;

        let id = saga.id().to_string();
        if let Some(property) = correlation_property {
            self.ensure_correlation_index(session, saga_type, &namespace, property, &id)
                .await?;
        }

        let version_field = session.config().version_field.clone();
        let mut document = codec::to_document(saga, &version_field)?;
        document.insert(version_field, Value::from(0));

        let cancel = session.cancellation_token().clone();
        let inserted = cancellable(&cancel, session.driver()?.insert_one(&namespace, document)).await;

        match inserted {
            Ok(()) => {
                session.versions_mut().store(saga_type, &id, 0);
                debug!(%saga_type, saga_id = %id, collection = %namespace, "saga saved");
                Ok(())
            }
            Err(SagaError::Driver(DriverError::DuplicateKey { field, .. })) => {
                warn!(%saga_type, saga_id = %id, %field, "duplicate saga correlation");
                Err(SagaError::DuplicateCorrelation {
                    saga_type: saga_type.to_string(),
                    field,
                    id,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Looks a saga up by id. A miss is `Ok(None)`.
    pub async fn get<T: SagaData>(
        &self,
        session: &mut TransactionalSession,
        id: Uuid,
    ) -> Result<Option<T>> {
        let filter = Filter::new().eq(ID_ELEMENT, codec::id_value(id));
        self.find_one(session, filter).await
    }

    /// Looks a saga up by equality on a logical property.
    ///
    /// Returns the first match; uniqueness of the property is the caller's
    /// concern unless it is the saga's correlation property.
    pub async fn get_by_property<T, V>(
        &self,
        session: &mut TransactionalSession,
        property: &str,
        value: V,
    ) -> Result<Option<T>>
    where
        T: SagaData,
        V: Serialize,
    {
        let field = self.fields.resolve(T::saga_type(), property)?;
        let filter = Filter::new().eq(field, serde_json::to_value(value)?);
        self.find_one(session, filter).await
    }

    async fn find_one<T: SagaData>(
        &self,
        session: &mut TransactionalSession,
        filter: Filter,
    ) -> Result<Option<T>> {
        let saga_type = T::saga_type();
        let namespace = session.namespace_for(saga_type)?;
        let version_field = session.config().version_field.clone();

        let cancel = session.cancellation_token().clone();
        let found = cancellable(&cancel, session.driver()?.find_one(&namespace, &filter)).await?;
        let Some(mut document) = found else {
            return Ok(None);
        };

        let version = document
            .remove(&version_field)
            .and_then(|value| value.as_i64())
            .ok_or_else(|| {
                SagaError::Serialization(format!(
                    "document in '{}' has no integer '{}' element",
                    namespace, version_field
                ))
            })?;
        let saga: T = codec::from_document(document)?;

        session
            .versions_mut()
            .store(saga_type, &saga.id().to_string(), version);
        Ok(Some(saga))
    }

    /// Writes every saga field back and bumps the version by 1.
    ///
    /// Requires a prior get or save of the same saga in this session. Fails
    /// with `ConcurrencyConflict` when the stored version moved on or the
    /// document is gone; the caller decides whether to reload and retry.
    pub async fn update<T: SagaData>(
        &self,
        session: &mut TransactionalSession,
        saga: &T,
    ) -> Result<()> {
        let saga_type = T::saga_type();
        let namespace = session.namespace_for(saga_type)?;
        let id = saga.id().to_string();

        let expected = session
            .versions()
            .retrieve(saga_type, &id)
            .ok_or_else(|| SagaError::SessionMisuse {
                saga_type: saga_type.to_string(),
                id: id.clone(),
            })?;

        let version_field = session.config().version_field.clone();
        let document = codec::to_document(saga, &version_field)?;

        let filter = Filter::new()
            .eq(ID_ELEMENT, codec::id_value(saga.id()))
            .eq(version_field.clone(), Value::from(expected));
        let update = document
            .into_iter()
            .filter(|(field, _)| field != ID_ELEMENT)
            .fold(UpdateSpec::new().inc(version_field, 1), |update, (field, value)| {
                update.set(field, value)
            });

        let cancel = session.cancellation_token().clone();
        let outcome = cancellable(
            &cancel,
            session.driver()?.find_one_and_update(&namespace, &filter, &update),
        )
        .await;

        match outcome {
            Ok(Some(_)) => {
                session.versions_mut().store(saga_type, &id, expected + 1);
                debug!(%saga_type, saga_id = %id, version = expected + 1, "saga updated");
                Ok(())
            }
            Ok(None) | Err(SagaError::Driver(DriverError::WriteConflict { .. })) => {
                warn!(%saga_type, saga_id = %id, expected_version = expected, "saga concurrency conflict");
                Err(conflict(saga_type, id))
            }
            Err(SagaError::Driver(DriverError::DuplicateKey { field, .. })) => {
                warn!(%saga_type, saga_id = %id, %field, "duplicate saga correlation on update");
                Err(SagaError::DuplicateCorrelation {
                    saga_type: saga_type.to_string(),
                    field,
                    id,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Deletes the saga by id without a version check. Deleting an absent
    /// saga succeeds.
    pub async fn complete<T: SagaData>(
        &self,
        session: &mut TransactionalSession,
        saga: &T,
    ) -> Result<()> {
        let saga_type = T::saga_type();
        let namespace = session.namespace_for(saga_type)?;
        let id = saga.id().to_string();
        let filter = Filter::new().eq(ID_ELEMENT, codec::id_value(saga.id()));

        let cancel = session.cancellation_token().clone();
        let deleted = cancellable(&cancel, session.driver()?.delete_one(&namespace, &filter)).await;

        match deleted {
            Ok(count) => {
                session.versions_mut().forget(saga_type, &id);
                debug!(%saga_type, saga_id = %id, deleted = count, "saga completed");
                Ok(())
            }
            Err(SagaError::Driver(DriverError::WriteConflict { .. })) => {
                warn!(%saga_type, saga_id = %id, "saga completion conflicted with another writer");
                Err(conflict(saga_type, id))
            }
            Err(err) => Err(err),
        }
    }

    /// Creates the correlation unique index unless the cache says it exists.
    ///
    /// Two sessions racing here both issue the create call; the driver treats
    /// the second as a no-op. Stored sagas that already share a correlation
    /// value make the creation fail with `DuplicateCorrelation`.
    async fn ensure_correlation_index(
        &self,
        session: &TransactionalSession,
        saga_type: SagaType,
        namespace: &Namespace,
        property: &str,
        id: &str,
    ) -> Result<()> {
        let database = session.config().database.as_str();
        if self.index_cache.contains(database, saga_type.name()) {
            return Ok(());
        }

        let field = self.fields.resolve(saga_type, property)?;
        let created = cancellable(
            session.cancellation_token(),
            session.client().create_unique_index(namespace, &field),
        )
        .await;

        match created {
            Ok(()) => {}
            Err(SagaError::Driver(DriverError::DuplicateKey { field, .. })) => {
                warn!(%saga_type, collection = %namespace, %field, "stored sagas already share a correlation value");
                return Err(SagaError::DuplicateCorrelation {
                    saga_type: saga_type.to_string(),
                    field,
                    id: id.to_string(),
                });
            }
            Err(err) => return Err(err),
        }

        if self.index_cache.mark_created(database, saga_type.name()) {
            info!(%saga_type, collection = %namespace, %field, "correlation index created");
        }
        Ok(())
    }
}

fn conflict(saga_type: SagaType, id: String) -> SagaError {
    SagaError::ConcurrencyConflict {
        saga_type: saga_type.to_string(),
        id,
    }
}
