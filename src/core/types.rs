use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use uuid::Uuid;

/// Physical representation of a stored saga.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Reserved element that holds the saga id in every stored document.
pub const ID_ELEMENT: &str = "_id";

/// Default name of the hidden optimistic-concurrency marker.
pub const DEFAULT_VERSION_FIELD: &str = "_version";

/// Identity of a saga record type.
///
/// Two types compare equal when their short names match, which is also the
/// name the default collection naming convention lowercases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SagaType(&'static str);

impl SagaType {
    pub fn of<T: ?Sized + 'static>() -> Self {
        SagaType(short_type_name(std::any::type_name::<T>()))
    }

    pub const fn named(name: &'static str) -> Self {
        SagaType(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for SagaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// `my_app::sagas::OrderSaga<u32>` -> `OrderSaga`
fn short_type_name(full: &'static str) -> &'static str {
    let without_generics = match full.find('<') {
        Some(pos) => &full[..pos],
        None => full,
    };
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}

/// A saga record the store can persist.
///
/// The record serializes to a JSON object. The property named by
/// [`SagaData::ID_FIELD`] is moved to the reserved `_id` element on write
/// and moved back on read.
pub trait SagaData: Serialize + DeserializeOwned + Send + Sync + 'static {
    const ID_FIELD: &'static str = "id";

    fn id(&self) -> Uuid;

    fn saga_type() -> SagaType
    where
        Self: Sized,
    {
        SagaType::of::<Self>()
    }
}
