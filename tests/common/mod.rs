use std::rc::Rc;

use propset::{MemoryStorage, PropertySetStorage};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A storage and a factory over it. Further factories over the same storage see the same streams.
pub fn new_storage() -> (MemoryStorage, PropertySetStorage) {
    init_tracing();
    let storage = MemoryStorage::new();
    let factory = PropertySetStorage::new(Rc::new(storage.clone()));
    (storage, factory)
}

pub fn reopen(storage: &MemoryStorage) -> PropertySetStorage {
    PropertySetStorage::new(Rc::new(storage.clone()))
}
