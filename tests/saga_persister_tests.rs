/// Saga persister tests
///
/// save / get / update / complete against the in-memory document store
/// Run with: cargo test --test saga_persister_tests

use saga_docstore::{
    FieldMap, IndexCache, InMemoryDocumentStore, Namespace, PersistenceConfig, SagaData,
    SagaError, SagaPersister, SessionFactory, StaticFieldResolver,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderSaga {
    id: Uuid,
    #[serde(rename = "OrderId")]
    order_id: String,
    total: u32,
}

impl SagaData for OrderSaga {
    fn id(&self) -> Uuid {
        self.id
    }
}

fn order(order_id: &str) -> OrderSaga {
    OrderSaga {
        id: Uuid::new_v4(),
        order_id: order_id.to_string(),
        total: 0,
    }
}

struct Harness {
    store: InMemoryDocumentStore,
    factory: SessionFactory,
    persister: SagaPersister,
}

async fn harness() -> Harness {
    harness_with(PersistenceConfig::default()).await
}

async fn harness_with(config: PersistenceConfig) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let store = InMemoryDocumentStore::new();
    let factory = SessionFactory::initialize(Arc::new(store.clone()), config)
        .await
        .unwrap();
    let fields = StaticFieldResolver::new().register(
        FieldMap::of::<OrderSaga>()
            .field("order_id", "OrderId")
            .same("total"),
    );
    let persister =
        SagaPersister::new(Arc::new(fields)).with_index_cache(Arc::new(IndexCache::new()));

    Harness {
        store,
        factory,
        persister,
    }
}

fn orders() -> Namespace {
    Namespace::new("sagas", "ordersaga")
}

impl Harness {
    async fn save_committed(&self, saga: &OrderSaga) {
        let mut session = self.factory.open().await.unwrap();
        self.persister
            .save(&mut session, saga, Some("order_id"))
            .await
            .unwrap();
        session.commit().await.unwrap();
    }

    fn stored(&self, id: Uuid) -> Option<serde_json::Map<String, serde_json::Value>> {
        self.store
            .committed_document(&orders(), &json!(id.to_string()))
            .unwrap()
    }
}

#[tokio::test]
async fn test_save_then_get_round_trip() {
    let h = harness().await;
    let saga = order("ORDER-1");
    h.save_committed(&saga).await;

    let mut session = h.factory.open().await.unwrap();
    let loaded: Option<OrderSaga> = assert_ok!(h.persister.get(&mut session, saga.id).await);
    assert_eq!(loaded, Some(saga.clone()));

    let stored = h.stored(saga.id).unwrap();
    assert_eq!(stored["_id"], json!(saga.id.to_string()));
    assert_eq!(stored["_version"], json!(0));
    assert_eq!(stored["OrderId"], json!("ORDER-1"));
    assert!(!stored.contains_key("id"));
}

#[tokio::test]
async fn test_get_missing_returns_none() {
    let h = harness().await;
    let mut session = h.factory.open().await.unwrap();

    let loaded: Option<OrderSaga> = h.persister.get(&mut session, Uuid::new_v4()).await.unwrap();
    assert!(loaded.is_none());
    assert!(session.versions().is_empty());
}

#[tokio::test]
async fn test_get_by_property() {
    let h = harness().await;
    let first = order("ORDER-1");
    let second = order("ORDER-2");
    h.save_committed(&first).await;
    h.save_committed(&second).await;

    let mut session = h.factory.open().await.unwrap();
    let found: Option<OrderSaga> = h
        .persister
        .get_by_property(&mut session, "order_id", "ORDER-2")
        .await
        .unwrap();
    assert_eq!(found, Some(second));

    let missing: Option<OrderSaga> = h
        .persister
        .get_by_property(&mut session, "order_id", "ORDER-3")
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_get_by_unknown_property_fails() {
    let h = harness().await;
    let mut session = h.factory.open().await.unwrap();

    let err = h
        .persister
        .get_by_property::<OrderSaga, _>(&mut session, "customer", "C-1")
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::PropertyNotFound { .. }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_save_creates_correlation_index_once() {
    let h = harness().await;
    assert!(h.persister.index_cache().is_empty());

    h.save_committed(&order("ORDER-1")).await;
    h.save_committed(&order("ORDER-2")).await;

    assert_eq!(h.persister.index_cache().len(), 1);
    assert!(h.persister.index_cache().contains("sagas", "OrderSaga"));
    assert_eq!(h.store.unique_index_fields(&orders()).unwrap(), vec!["OrderId".to_string()]);
}

#[tokio::test]
async fn test_save_without_correlation_skips_index() {
    let h = harness().await;
    let mut session = h.factory.open().await.unwrap();
    h.persister.save(&mut session, &order("ORDER-1"), None).await.unwrap();
    session.commit().await.unwrap();

    assert!(h.persister.index_cache().is_empty());
    assert!(h.store.unique_index_fields(&orders()).unwrap().is_empty());
    assert_eq!(h.store.document_count(&orders()).unwrap(), 1);
}

#[tokio::test]
async fn test_duplicate_correlation_rejected() {
    let h = harness().await;
    h.save_committed(&order("ORDER-1")).await;

    let mut session = h.factory.open().await.unwrap();
    let err = h
        .persister
        .save(&mut session, &order("ORDER-1"), Some("order_id"))
        .await
        .unwrap_err();
    assert!(err.is_duplicate_correlation());
    session.discard().await.unwrap();

    assert_eq!(h.store.document_count(&orders()).unwrap(), 1);
}

#[tokio::test]
async fn test_duplicate_id_rejected() {
    let h = harness().await;
    let saga = order("ORDER-1");
    h.save_committed(&saga).await;

    let mut session = h.factory.open().await.unwrap();
    let again = OrderSaga {
        order_id: "ORDER-2".into(),
        ..saga
    };
    let err = h.persister.save(&mut session, &again, None).await.unwrap_err();
    assert!(matches!(err, SagaError::DuplicateCorrelation { ref field, .. } if field == "_id"));
}

#[tokio::test]
async fn test_save_with_unmapped_correlation_property_fails() {
    let h = harness().await;
    let mut session = h.factory.open().await.unwrap();

    let err = h
        .persister
        .save(&mut session, &order("ORDER-1"), Some("customer"))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::PropertyNotFound { .. }));
    assert!(h.persister.index_cache().is_empty());
}

#[tokio::test]
async fn test_update_bumps_version_by_one() {
    let h = harness().await;
    let saga = order("ORDER-1");
    h.save_committed(&saga).await;

    let mut session = h.factory.open().await.unwrap();
    let mut loaded: OrderSaga = h.persister.get(&mut session, saga.id).await.unwrap().unwrap();
    loaded.total = 42;
    assert_ok!(h.persister.update(&mut session, &loaded).await);

    loaded.total = 43;
    assert_ok!(h.persister.update(&mut session, &loaded).await);
    session.commit().await.unwrap();

    let stored = h.stored(saga.id).unwrap();
    assert_eq!(stored["_version"], json!(2));
    assert_eq!(stored["total"], json!(43));
}

#[tokio::test]
async fn test_update_after_save_in_same_session() {
    let h = harness().await;
    let mut saga = order("ORDER-1");

    let mut session = h.factory.open().await.unwrap();
    h.persister.save(&mut session, &saga, Some("order_id")).await.unwrap();
    saga.total = 7;
    h.persister.update(&mut session, &saga).await.unwrap();
    session.commit().await.unwrap();

    let stored = h.stored(saga.id).unwrap();
    assert_eq!(stored["_version"], json!(1));
    assert_eq!(stored["total"], json!(7));
}

#[tokio::test]
async fn test_update_without_prior_read_is_misuse() {
    let h = harness().await;
    let saga = order("ORDER-1");
    h.save_committed(&saga).await;

    let mut session = h.factory.open().await.unwrap();
    let err = assert_err!(h.persister.update(&mut session, &saga).await);
    assert!(matches!(err, SagaError::SessionMisuse { .. }));

    assert_eq!(h.stored(saga.id).unwrap()["_version"], json!(0));
}

#[tokio::test]
async fn test_update_of_removed_saga_conflicts() {
    let h = harness().await;
    let saga = order("ORDER-1");
    h.save_committed(&saga).await;

    let mut reader = h.factory.open().await.unwrap();
    let loaded: OrderSaga = h.persister.get(&mut reader, saga.id).await.unwrap().unwrap();

    let mut finisher = h.factory.open().await.unwrap();
    let done: OrderSaga = h.persister.get(&mut finisher, saga.id).await.unwrap().unwrap();
    h.persister.complete(&mut finisher, &done).await.unwrap();
    finisher.commit().await.unwrap();

    let err = h.persister.update(&mut reader, &loaded).await.unwrap_err();
    assert!(err.is_concurrency_conflict());
}

#[tokio::test]
async fn test_update_onto_taken_correlation_value() {
    let h = harness().await;
    let first = order("ORDER-1");
    let second = order("ORDER-2");
    h.save_committed(&first).await;
    h.save_committed(&second).await;

    let mut session = h.factory.open().await.unwrap();
    let mut loaded: OrderSaga = h.persister.get(&mut session, second.id).await.unwrap().unwrap();
    loaded.order_id = "ORDER-1".into();

    let err = h.persister.update(&mut session, &loaded).await.unwrap_err();
    assert!(err.is_duplicate_correlation());
}

#[tokio::test]
async fn test_complete_removes_saga() {
    let h = harness().await;
    let saga = order("ORDER-1");
    h.save_committed(&saga).await;

    let mut session = h.factory.open().await.unwrap();
    let loaded: OrderSaga = h.persister.get(&mut session, saga.id).await.unwrap().unwrap();
    h.persister.complete(&mut session, &loaded).await.unwrap();

    let err = h.persister.update(&mut session, &loaded).await.unwrap_err();
    assert!(matches!(err, SagaError::SessionMisuse { .. }));
    session.commit().await.unwrap();

    let mut session = h.factory.open().await.unwrap();
    let gone: Option<OrderSaga> = h.persister.get(&mut session, saga.id).await.unwrap();
    assert!(gone.is_none());
    assert_eq!(h.store.document_count(&orders()).unwrap(), 0);
}

#[tokio::test]
async fn test_complete_absent_saga_succeeds() {
    let h = harness().await;
    let mut session = h.factory.open().await.unwrap();

    assert_ok!(h.persister.complete(&mut session, &order("ORDER-404")).await);
    assert_ok!(session.commit().await);
}

#[tokio::test]
async fn test_custom_version_field() {
    let h = harness_with(PersistenceConfig::default().version_field("_rev")).await;
    let saga = order("ORDER-1");
    h.save_committed(&saga).await;

    let mut session = h.factory.open().await.unwrap();
    let loaded: OrderSaga = h.persister.get(&mut session, saga.id).await.unwrap().unwrap();
    h.persister.update(&mut session, &loaded).await.unwrap();
    session.commit().await.unwrap();

    let stored = h.stored(saga.id).unwrap();
    assert_eq!(stored["_rev"], json!(1));
    assert!(!stored.contains_key("_version"));
}

#[tokio::test]
async fn test_custom_collection_naming() {
    let config = PersistenceConfig::new("billing")
        .collection_naming(|saga_type| format!("saga_{}", saga_type.name().to_lowercase()));
    let h = harness_with(config).await;
    let saga = order("ORDER-1");
    h.save_committed(&saga).await;

    let namespace = Namespace::new("billing", "saga_ordersaga");
    assert_eq!(h.store.document_count(&namespace).unwrap(), 1);
    assert_eq!(h.store.document_count(&orders()).unwrap(), 0);
    assert!(h.persister.index_cache().contains("billing", "OrderSaga"));
}

#[tokio::test]
async fn test_with_session_helper() {
    let h = harness().await;
    let persister = Arc::new(h.persister);
    let saga = order("ORDER-1");

    let p = Arc::clone(&persister);
    let to_save = saga.clone();
    h.factory
        .with_session(move |session| {
            Box::pin(async move { p.save(session, &to_save, Some("order_id")).await })
        })
        .await
        .unwrap();

    let p = Arc::clone(&persister);
    let id = saga.id;
    let loaded: Option<OrderSaga> = h
        .factory
        .with_session(move |session| Box::pin(async move { p.get(session, id).await }))
        .await
        .unwrap();
    assert_eq!(loaded, Some(saga));
}

#[tokio::test]
async fn test_with_session_discards_on_error() {
    let h = harness().await;
    let persister = Arc::new(h.persister);
    let saga = order("ORDER-1");

    let p = Arc::clone(&persister);
    let to_save = saga.clone();
    let result: Result<(), SagaError> = h
        .factory
        .with_session(move |session| {
            Box::pin(async move {
                p.save(session, &to_save, Some("order_id")).await?;
                Err(SagaError::InvalidConfig("handler failed".into()))
            })
        })
        .await;
    assert!(result.is_err());

    assert_eq!(h.store.document_count(&orders()).unwrap(), 0);
}

#[tokio::test]
async fn test_correlation_value_reusable_after_complete_in_same_session() {
    let h = harness().await;
    let finished = order("ORDER-1");
    h.save_committed(&finished).await;

    let mut session = h.factory.open().await.unwrap();
    let loaded: OrderSaga = h.persister.get(&mut session, finished.id).await.unwrap().unwrap();
    h.persister.complete(&mut session, &loaded).await.unwrap();

    let successor = order("ORDER-1");
    assert_ok!(h.persister.save(&mut session, &successor, Some("order_id")).await);
    session.commit().await.unwrap();

    assert!(h.stored(finished.id).is_none());
    assert_eq!(h.stored(successor.id).unwrap()["OrderId"], json!("ORDER-1"));
    assert_eq!(h.store.document_count(&orders()).unwrap(), 1);
}

#[tokio::test]
async fn test_correlation_value_reusable_after_update_moves_off_it() {
    let h = harness().await;
    let first = order("ORDER-1");
    h.save_committed(&first).await;

    let mut session = h.factory.open().await.unwrap();
    let mut moved: OrderSaga = h.persister.get(&mut session, first.id).await.unwrap().unwrap();
    moved.order_id = "ORDER-9".into();
    h.persister.update(&mut session, &moved).await.unwrap();

    let second = order("ORDER-1");
    assert_ok!(h.persister.save(&mut session, &second, Some("order_id")).await);
    session.commit().await.unwrap();

    assert_eq!(h.stored(first.id).unwrap()["OrderId"], json!("ORDER-9"));
    assert_eq!(h.stored(second.id).unwrap()["OrderId"], json!("ORDER-1"));
}

#[tokio::test]
async fn test_completed_value_still_taken_for_other_sessions() {
    let h = harness().await;
    let finished = order("ORDER-1");
    h.save_committed(&finished).await;

    let mut completing = h.factory.open().await.unwrap();
    let loaded: OrderSaga = h.persister.get(&mut completing, finished.id).await.unwrap().unwrap();
    h.persister.complete(&mut completing, &loaded).await.unwrap();

    // The deletion is not committed yet, so the value still belongs to it.
    let mut other = h.factory.open().await.unwrap();
    let err = h
        .persister
        .save(&mut other, &order("ORDER-1"), Some("order_id"))
        .await
        .unwrap_err();
    assert!(err.is_duplicate_correlation());
}

#[tokio::test]
async fn test_two_instances_of_one_type_in_one_session() {
    let h = harness().await;
    let left = order("ORDER-L");
    let right = order("ORDER-R");
    h.save_committed(&left).await;
    h.save_committed(&right).await;

    let mut session = h.factory.open().await.unwrap();
    let mut a: OrderSaga = h.persister.get(&mut session, left.id).await.unwrap().unwrap();
    let mut b: OrderSaga = h.persister.get(&mut session, right.id).await.unwrap().unwrap();

    a.total = 1;
    h.persister.update(&mut session, &a).await.unwrap();
    b.total = 1;
    h.persister.update(&mut session, &b).await.unwrap();
    a.total = 2;
    h.persister.update(&mut session, &a).await.unwrap();
    a.total = 3;
    h.persister.update(&mut session, &a).await.unwrap();
    b.total = 2;
    h.persister.update(&mut session, &b).await.unwrap();
    session.commit().await.unwrap();

    let stored_left = h.stored(left.id).unwrap();
    let stored_right = h.stored(right.id).unwrap();
    assert_eq!(stored_left["_version"], json!(3));
    assert_eq!(stored_left["total"], json!(3));
    assert_eq!(stored_right["_version"], json!(2));
    assert_eq!(stored_right["total"], json!(2));
}

#[tokio::test]
async fn test_index_over_existing_duplicates_reports_duplicate_correlation() {
    let h = harness().await;

    let mut session = h.factory.open().await.unwrap();
    h.persister.save(&mut session, &order("ORDER-1"), None).await.unwrap();
    h.persister.save(&mut session, &order("ORDER-1"), None).await.unwrap();
    session.commit().await.unwrap();

    let mut session = h.factory.open().await.unwrap();
    let err = h
        .persister
        .save(&mut session, &order("ORDER-2"), Some("order_id"))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::DuplicateCorrelation { ref field, .. } if field == "OrderId"));
    assert!(h.persister.index_cache().is_empty());
}
