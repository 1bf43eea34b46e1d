pub mod collection;
pub mod field;

pub use collection::{CollectionNamingConvention, CollectionResolver};
pub use field::{FieldMap, FieldResolver, StaticFieldResolver};
