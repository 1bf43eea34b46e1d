use crate::core::SagaType;
use std::fmt;
use std::sync::Arc;

pub type CollectionNamingConvention = Arc<dyn Fn(SagaType) -> String + Send + Sync>;

/// Maps a saga type to the collection its documents live in.
#[derive(Clone)]
pub struct CollectionResolver {
    convention: CollectionNamingConvention,
}

impl CollectionResolver {
    pub fn new<F>(convention: F) -> Self
    where
        F: Fn(SagaType) -> String + Send + Sync + 'static,
    {
        Self {
            convention: Arc::new(convention),
        }
    }

    pub fn resolve(&self, saga_type: SagaType) -> String {
        (self.convention)(saga_type)
    }
}

impl Default for CollectionResolver {
    /// Lowercase type name.
    fn default() -> Self {
        Self::new(|saga_type| saga_type.name().to_lowercase())
    }
}

impl fmt::Debug for CollectionResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionResolver").finish_non_exhaustive()
    }
}
