//! Test fixtures and datastore helpers.
//!
//! Provides convenience functions for setting up datastores and common test
//! scenarios.

use std::sync::Arc;

use dstore_cache::{CacheConfig, CachedDatastore, MemoryCache};
use dstore_core::{
    Config, Datastore, Key, KeyContext, MemoryDatastore, PropertyMap, PropertyValue, RawDatastore,
};

/// A cached datastore together with the pieces it is built from.
///
/// `mem` shares its state with the datastore inside `ds`, so tests can
/// read and write around the cache.
pub struct TestStore {
    /// The uncached datastore.
    pub mem: MemoryDatastore,
    /// The cache.
    pub cache: Arc<MemoryCache>,
    /// `mem` behind the cache layer.
    pub ds: CachedDatastore<MemoryDatastore>,
}

impl TestStore {
    /// Creates a store with default configuration.
    pub fn new() -> Self {
        Self::with_configs(Config::default(), CacheConfig::default())
    }

    /// Creates a store with the given configurations.
    pub fn with_configs(config: Config, cache_config: CacheConfig) -> Self {
        let mem = MemoryDatastore::with_config(config);
        let cache = Arc::new(MemoryCache::new());
        let ds = CachedDatastore::new(mem.clone(), cache.clone(), cache_config);
        Self { mem, cache, ds }
    }

    /// Key context of the store.
    pub fn context(&self) -> KeyContext {
        self.mem.key_context()
    }

    /// Typed facade over the cached datastore.
    pub fn datastore(&self) -> Datastore<'_> {
        Datastore::new(&self.ds)
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test with a fresh cached store.
///
/// # Example
///
/// ```
/// use dstore_testkit::with_store;
///
/// with_store(|store| assert!(store.cache.is_empty()));
/// ```
pub fn with_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let store = TestStore::new();
    f(&store)
}

/// A property map with one `Value` integer.
pub fn value_map(value: i64) -> PropertyMap {
    let mut pm = PropertyMap::new();
    pm.set("Value", value);
    pm
}

/// A property map built from `(name, value)` pairs.
pub fn pmap<'a>(pairs: impl IntoIterator<Item = (&'a str, PropertyValue)>) -> PropertyMap {
    let mut pm = PropertyMap::new();
    for (name, value) in pairs {
        pm.set(name, value);
    }
    pm
}

/// Stores [`value_map`]`(value)` under `key`.
pub fn put_value(ds: &dyn RawDatastore, key: &Key, value: i64) -> Key {
    let mut out = ds
        .put_multi_collect(std::slice::from_ref(key), &[value_map(value)])
        .expect("put failed");
    out.pop()
        .expect("put produced no result")
        .expect("put item failed")
}

/// The `Value` property of `key`, or `None` if it does not exist.
pub fn read_value(ds: &dyn RawDatastore, key: &Key) -> Option<i64> {
    ds.get_multi_collect(std::slice::from_ref(key))
        .expect("get failed")
        .pop()
        .and_then(Result::ok)
        .and_then(|pm| pm.first("Value").and_then(PropertyValue::as_int))
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A store holding `Obj` entities 1..=count with `Value` equal to the id.
    pub fn populated_store(count: i64) -> TestStore {
        let store = TestStore::new();
        let ctx = store.context();
        for i in 1..=count {
            put_value(&store.ds, &ctx.new_key("Obj", i, None), i);
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_shares_state_around_the_cache() {
        let store = TestStore::new();
        let key = store.context().new_key("Obj", 1, None);
        put_value(&store.mem, &key, 1);
        assert_eq!(read_value(&store.ds, &key), Some(1));
        assert_eq!(store.cache.len(), 1);
    }

    #[test]
    fn facade_puts_through_the_cache() {
        with_store(|store| {
            let key = store.context().new_key("Obj", 1, None);
            let mut pm = pmap([("Value", PropertyValue::Int(4))]);
            pm.set_meta("key", key.clone());
            store.datastore().put(&mut pm).unwrap();
            assert_eq!(read_value(&store.mem, &key), Some(4));
        });
    }

    #[test]
    fn populated_store_has_every_entity() {
        let store = scenarios::populated_store(5);
        assert_eq!(store.mem.entity_count(), 5);
        let key = store.context().new_key("Obj", 3, None);
        assert_eq!(read_value(&store.ds, &key), Some(3));
    }
}
