use crate::core::{ID_ELEMENT, Result, SagaData, SagaError, SagaType};
use std::collections::HashMap;

/// Maps a logical saga property to the element name it is stored under.
pub trait FieldResolver: Send + Sync {
    fn resolve(&self, saga_type: SagaType, property: &str) -> Result<String>;
}

/// Property map of one saga type.
#[derive(Debug, Clone)]
pub struct FieldMap {
    saga_type: SagaType,
    fields: HashMap<String, String>,
}

impl FieldMap {
    /// Starts a map for `T`. The id property is always mapped to `_id`.
    pub fn of<T: SagaData>() -> Self {
        let mut fields = HashMap::new();
        fields.insert(T::ID_FIELD.to_string(), ID_ELEMENT.to_string());
        Self {
            saga_type: T::saga_type(),
            fields,
        }
    }

    /// Maps `property` to the element `element`.
    pub fn field(mut self, property: &str, element: &str) -> Self {
        self.fields.insert(property.to_string(), element.to_string());
        self
    }

    /// Maps `property` to an element of the same name.
    pub fn same(self, property: &str) -> Self {
        self.field(property, property)
    }

    pub fn saga_type(&self) -> SagaType {
        self.saga_type
    }

    pub fn get(&self, property: &str) -> Option<&str> {
        self.fields.get(property).map(String::as_str)
    }
}

/// Field resolver built once at startup from explicit registrations.
#[derive(Debug, Clone, Default)]
pub struct StaticFieldResolver {
    maps: HashMap<SagaType, FieldMap>,
}

impl StaticFieldResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a field map, replacing any earlier map for the same type.
    pub fn register(mut self, map: FieldMap) -> Self {
        self.maps.insert(map.saga_type(), map);
        self
    }

    pub fn is_registered(&self, saga_type: SagaType) -> bool {
        self.maps.contains_key(&saga_type)
    }
}

impl FieldResolver for StaticFieldResolver {
    fn resolve(&self, saga_type: SagaType, property: &str) -> Result<String> {
        self.maps
            .get(&saga_type)
            .and_then(|map| map.get(property))
            .map(str::to_string)
            .ok_or_else(|| SagaError::PropertyNotFound {
                saga_type: saga_type.to_string(),
                property: property.to_string(),
            })
    }
}
