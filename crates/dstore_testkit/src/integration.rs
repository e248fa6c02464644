//! Model-checking harness.
//!
//! Applies operations to a datastore and to a plain map, then checks that
//! the datastore agrees with the map.

use std::collections::BTreeMap;

use dstore_core::{CoreError, Key, KeyContext, PropertyMap, RawDatastore};

use crate::fixtures::value_map;
use crate::generators::EntityOperation;

/// Tracks what a datastore should contain.
pub struct ModelHarness<'a> {
    ds: &'a dyn RawDatastore,
    ctx: KeyContext,
    entities: BTreeMap<Key, PropertyMap>,
}

impl<'a> ModelHarness<'a> {
    /// Creates a harness over `ds`, which must start out empty for `Obj`.
    pub fn new(ds: &'a dyn RawDatastore) -> Self {
        Self {
            ctx: ds.key_context(),
            ds,
            entities: BTreeMap::new(),
        }
    }

    /// Key of `Obj/id`.
    pub fn key(&self, id: i64) -> Key {
        self.ctx.new_key("Obj", id, None)
    }

    /// Puts an entity and tracks it for later verification.
    pub fn put(&mut self, key: &Key, pm: PropertyMap) {
        let out = self
            .ds
            .put_multi_collect(std::slice::from_ref(key), std::slice::from_ref(&pm))
            .expect("put failed");
        assert_eq!(out, vec![Ok(key.clone())]);
        self.entities.insert(key.clone(), pm);
    }

    /// Deletes an entity and updates tracking.
    pub fn delete(&mut self, key: &Key) {
        let out = self
            .ds
            .delete_multi_collect(std::slice::from_ref(key))
            .expect("delete failed");
        assert_eq!(out, vec![Ok(())]);
        self.entities.remove(key);
    }

    /// Gets an entity and checks it against the tracked value.
    pub fn get_and_verify(&self, key: &Key) -> Option<PropertyMap> {
        let mut out = self
            .ds
            .get_multi_collect(std::slice::from_ref(key))
            .expect("get failed");
        let actual = match out.pop().expect("get produced no result") {
            Ok(pm) => Some(pm),
            Err(CoreError::NoSuchEntity) => None,
            Err(err) => panic!("get {key} failed: {err}"),
        };
        assert_eq!(actual.as_ref(), self.entities.get(key), "mismatch for {key}");
        actual
    }

    /// Applies one generated operation.
    pub fn apply(&mut self, op: &EntityOperation) {
        match *op {
            EntityOperation::Put { id, value } => self.put(&self.key(id), value_map(value)),
            EntityOperation::Delete { id } => self.delete(&self.key(id)),
            EntityOperation::Get { id } => {
                self.get_and_verify(&self.key(id));
            }
        }
    }

    /// Checks every tracked entity with one batch read.
    pub fn verify_all(&self) {
        let keys: Vec<Key> = self.entities.keys().cloned().collect();
        let got = self.ds.get_multi_collect(&keys).expect("get failed");
        for (key, actual) in keys.iter().zip(got) {
            assert_eq!(actual.as_ref().ok(), self.entities.get(key), "mismatch for {key}");
        }
    }

    /// Returns the count of tracked entities.
    pub fn tracked_count(&self) -> usize {
        self.entities.len()
    }
}
