mod codec;
pub mod persister;

pub use persister::SagaPersister;
