use crate::core::{Document, ID_ELEMENT, Result, SagaData, SagaError};
use serde_json::Value;
use uuid::Uuid;

/// `_id` value stored for a saga id.
pub(crate) fn id_value(id: Uuid) -> Value {
    Value::String(id.to_string())
}

/// Serializes a saga into its stored shape, minus the version marker.
///
/// The id property moves to `_id`. A record that already carries an element
/// named like the version marker is rejected.
pub(crate) fn to_document<T: SagaData>(saga: &T, version_field: &str) -> Result<Document> {
    let Value::Object(mut document) = serde_json::to_value(saga)? else {
        return Err(SagaError::Serialization(format!(
            "saga '{}' must serialize to an object",
            T::saga_type()
        )));
    };

    if document.contains_key(version_field) || document.contains_key(ID_ELEMENT) {
        return Err(SagaError::Serialization(format!(
            "saga '{}' uses a reserved element ('{}' or '{}')",
            T::saga_type(),
            version_field,
            ID_ELEMENT
        )));
    }

    document.remove(T::ID_FIELD);
    document.insert(ID_ELEMENT.to_string(), id_value(saga.id()));
    Ok(document)
}

/// Rebuilds a saga from a stored document whose version marker was
/// already removed.
pub(crate) fn from_document<T: SagaData>(mut document: Document) -> Result<T> {
    if let Some(id) = document.remove(ID_ELEMENT) {
        document.insert(T::ID_FIELD.to_string(), id);
    }
    Ok(serde_json::from_value(Value::Object(document))?)
}
