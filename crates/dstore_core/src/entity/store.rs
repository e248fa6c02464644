//! The entity map with its index projections and entity-group versions.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{CoreError, CoreResult};
use crate::index::{CompositeIndex, IndexDefinition, KindIndex, PropertyIndex};
use crate::key::Key;
use crate::property::PropertyMap;
use crate::query::{Query, QueryPlan};

/// Lazily produced query results: key and stored properties.
pub type QueryRows<'a> = Box<dyn Iterator<Item = (&'a Key, &'a PropertyMap)> + 'a>;

/// One immutable-by-convention version of the whole datastore.
///
/// Writers clone-on-write through `Arc::make_mut`, so readers holding an
/// older `Arc<StoreState>` keep a consistent point-in-time view. Every
/// mutation keeps the kind, property and composite projections in step
/// with the entity map.
///
/// The first write after a snapshot was taken copies the whole state,
/// projections included, so a commit racing an open transaction costs
/// O(store size). Writes with no snapshot outstanding mutate in place.
///
/// Group versions are kept for every root ever written, even once the
/// group is empty, so a recreated group never reuses an old version.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    entities: BTreeMap<Key, PropertyMap>,
    kinds: KindIndex,
    properties: PropertyIndex,
    composites: BTreeMap<IndexDefinition, CompositeIndex>,
    groups: HashMap<Key, u64>,
}

impl StoreState {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored properties of `key`.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<&PropertyMap> {
        self.entities.get(key)
    }

    /// True if `key` is stored.
    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.entities.contains_key(key)
    }

    /// Number of stored entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Stores `pm` under a complete `key`, replacing any previous entity.
    pub fn put(&mut self, key: Key, pm: PropertyMap) {
        if let Some(old) = self.entities.remove(&key) {
            self.unindex(&key, &old);
        }
        self.kinds.insert(&key);
        self.properties.insert(&key, &pm);
        for index in self.composites.values_mut() {
            index.insert(&key, &pm);
        }
        self.entities.insert(key, pm);
    }

    /// Removes `key`. Returns false if it was not stored.
    pub fn delete(&mut self, key: &Key) -> bool {
        match self.entities.remove(key) {
            Some(old) => {
                self.unindex(key, &old);
                true
            }
            None => false,
        }
    }

    fn unindex(&mut self, key: &Key, old: &PropertyMap) {
        self.kinds.remove(key);
        self.properties.remove(key, old);
        for index in self.composites.values_mut() {
            index.remove(key, old);
        }
    }

    /// Commit counter of the entity group rooted at `root`.
    #[must_use]
    pub fn group_version(&self, root: &Key) -> u64 {
        self.groups.get(root).copied().unwrap_or(0)
    }

    /// Records a commit to the entity group rooted at `root`.
    pub fn bump_group(&mut self, root: &Key) {
        *self.groups.entry(root.clone()).or_insert(0) += 1;
    }

    /// Registers a composite index and fills it from the stored entities.
    /// Builtin and already registered definitions are ignored.
    ///
    /// # Errors
    ///
    /// Fails if the definition is invalid.
    pub fn add_index(&mut self, def: IndexDefinition) -> CoreResult<bool> {
        def.validate()?;
        if def.is_builtin() || self.composites.contains_key(&def) {
            return Ok(false);
        }
        let mut index = CompositeIndex::new(def.clone());
        for (key, pm) in &self.entities {
            index.insert(key, pm);
        }
        self.composites.insert(def, index);
        Ok(true)
    }

    /// Registered composite definitions.
    pub fn indexes(&self) -> impl Iterator<Item = &IndexDefinition> {
        self.composites.keys()
    }

    /// Plans `query` and returns a single-pass iterator over its results.
    ///
    /// # Errors
    ///
    /// Planning errors, see [`Query::plan`].
    pub fn run_query<'a>(&'a self, query: &Query, namespace: &str) -> CoreResult<QueryRows<'a>> {
        let plan = query.plan(namespace, self.composites.keys())?;
        let ancestor = query.ancestor_key();

        let keys: Box<dyn Iterator<Item = &'a Key> + 'a> = match &plan {
            QueryPlan::Kind { .. } => self.kinds.scan(namespace, query.kind(), ancestor),
            QueryPlan::Property {
                property,
                range,
                direction,
                ..
            } => self
                .properties
                .scan(namespace, query.kind(), property, range, *direction),
            QueryPlan::Composite {
                index,
                prefix,
                range,
                ..
            } => {
                let composite = self.composites.get(index).ok_or_else(|| {
                    CoreError::MissingIndex {
                        index: index.to_string(),
                    }
                })?;
                composite.scan(namespace, ancestor, prefix, range.as_ref())
            }
        };

        let mut seen: HashSet<&'a Key> = HashSet::new();
        let rows = keys
            .filter(move |key| seen.insert(*key))
            .filter_map(move |key| self.entities.get(key).map(|pm| (key, pm)))
            .filter(move |(_, pm)| plan.matches(pm))
            .skip(query.result_offset())
            .take(query.result_limit().unwrap_or(usize::MAX));
        Ok(Box::new(rows))
    }
}
