//! The entity store as a transactional component.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::entity::{IdAllocator, StoreState};
use crate::error::{CoreError, CoreResult};
use crate::index::IndexDefinition;
use crate::key::Key;
use crate::property::PropertyMap;
use crate::transaction::{ComponentSnapshot, LockedComponent, TransactionOptions, TxnComponent};

/// Current store state plus the id allocator.
///
/// Lock order is `head` before `ids`.
pub(crate) struct DatastoreData {
    head: Mutex<Arc<StoreState>>,
    ids: Mutex<IdAllocator>,
    max_xg_groups: usize,
}

impl DatastoreData {
    pub(crate) fn new(max_xg_groups: usize) -> Self {
        Self {
            head: Mutex::new(Arc::new(StoreState::new())),
            ids: Mutex::new(IdAllocator::new()),
            max_xg_groups,
        }
    }

    /// Point-in-time view of the store.
    pub(crate) fn head(&self) -> Arc<StoreState> {
        Arc::clone(&self.head.lock())
    }

    pub(crate) fn add_index(&self, def: IndexDefinition) -> CoreResult<bool> {
        let mut head = self.head.lock();
        Arc::make_mut(&mut head).add_index(def)
    }

    /// Gives `key` an id no stored entity uses. Complete keys pass through.
    pub(crate) fn complete(&self, key: &Key) -> Key {
        if !key.is_incomplete() {
            return key.clone();
        }
        let head = self.head.lock();
        self.ids.lock().allocate(key, |k| head.contains(k))
    }

    pub(crate) fn put(&self, key: &Key, pm: PropertyMap) -> Key {
        let mut head = self.head.lock();
        let key = if key.is_incomplete() {
            self.ids.lock().allocate(key, |k| head.contains(k))
        } else {
            key.clone()
        };
        let state = Arc::make_mut(&mut head);
        state.put(key.clone(), pm);
        state.bump_group(key.root());
        key
    }

    pub(crate) fn delete(&self, key: &Key) {
        let mut head = self.head.lock();
        let state = Arc::make_mut(&mut head);
        state.delete(key);
        state.bump_group(key.root());
    }
}

impl fmt::Debug for DatastoreData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatastoreData")
            .field("entities", &self.head.lock().len())
            .field("max_xg_groups", &self.max_xg_groups)
            .finish_non_exhaustive()
    }
}

impl TxnComponent for DatastoreData {
    fn name(&self) -> &'static str {
        "datastore"
    }

    fn begin(&self, opts: &TransactionOptions) -> Box<dyn ComponentSnapshot> {
        Box::new(DatastoreSnapshot {
            base: self.head(),
            writes: BTreeMap::new(),
            groups: BTreeMap::new(),
            group_limit: if opts.xg { self.max_xg_groups } else { 1 },
            read_only: opts.read_only,
        })
    }

    fn lock(&self) -> Box<dyn LockedComponent + '_> {
        Box::new(LockedDatastore {
            head: self.head.lock(),
        })
    }
}

/// One attempt's view of the store.
///
/// Reads see `base` only; writes are buffered until commit.
pub(crate) struct DatastoreSnapshot {
    base: Arc<StoreState>,
    writes: BTreeMap<Key, Option<PropertyMap>>,
    /// Root key of every touched group, with the version seen at first touch.
    groups: BTreeMap<Key, u64>,
    group_limit: usize,
    read_only: bool,
}

impl DatastoreSnapshot {
    pub(crate) fn base(&self) -> &StoreState {
        &self.base
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Records that the attempt depends on `key`'s entity group.
    pub(crate) fn touch(&mut self, key: &Key) -> CoreResult<()> {
        let root = key.root();
        if self.groups.contains_key(root) {
            return Ok(());
        }
        if self.groups.len() >= self.group_limit {
            return Err(CoreError::TooManyEntityGroups {
                limit: self.group_limit,
            });
        }
        self.groups
            .insert(root.clone(), self.base.group_version(root));
        Ok(())
    }

    pub(crate) fn write(&mut self, key: Key, value: Option<PropertyMap>) {
        self.writes.insert(key, value);
    }
}

impl ComponentSnapshot for DatastoreSnapshot {
    fn end_transaction(&mut self) {
        self.writes.clear();
        self.groups.clear();
        self.base = Arc::default();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct LockedDatastore<'a> {
    head: MutexGuard<'a, Arc<StoreState>>,
}

impl LockedComponent for LockedDatastore<'_> {
    fn can_apply(&self, snapshot: &dyn ComponentSnapshot) -> bool {
        let Some(snap) = snapshot.as_any().downcast_ref::<DatastoreSnapshot>() else {
            return false;
        };
        snap.groups
            .iter()
            .all(|(root, seen)| self.head.group_version(root) == *seen)
    }

    fn apply(&mut self, snapshot: &mut dyn ComponentSnapshot) {
        let Some(snap) = snapshot.as_any_mut().downcast_mut::<DatastoreSnapshot>() else {
            return;
        };
        if snap.writes.is_empty() {
            return;
        }
        let state = Arc::make_mut(&mut self.head);
        let mut roots = BTreeSet::new();
        for (key, value) in std::mem::take(&mut snap.writes) {
            roots.insert(key.root().clone());
            match value {
                Some(pm) => state.put(key, pm),
                None => {
                    state.delete(&key);
                }
            }
        }
        for root in &roots {
            state.bump_group(root);
        }
    }
}
