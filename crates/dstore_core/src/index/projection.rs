//! Ordered projections over the entity map.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::{Direction, IndexDefinition};
use crate::key::Key;
use crate::property::{PropertyMap, PropertyValue};
use crate::query::ValueRange;

type KeyIter<'a> = Box<dyn Iterator<Item = &'a Key> + 'a>;

fn indexed_values<'a>(pm: &'a PropertyMap, name: &str) -> Vec<&'a PropertyValue> {
    pm.get(name)
        .unwrap_or_default()
        .iter()
        .filter(|p| p.is_indexed())
        .map(|p| p.value())
        .collect()
}

/// Keys of every entity, grouped by namespace and kind.
#[derive(Debug, Clone, Default)]
pub struct KindIndex {
    entries: BTreeMap<(String, String), BTreeSet<Key>>,
}

impl KindIndex {
    /// Adds a key.
    pub fn insert(&mut self, key: &Key) {
        self.entries
            .entry((key.namespace().to_string(), key.kind().to_string()))
            .or_default()
            .insert(key.clone());
    }

    /// Removes a key.
    pub fn remove(&mut self, key: &Key) {
        let slot = (key.namespace().to_string(), key.kind().to_string());
        if let Some(keys) = self.entries.get_mut(&slot) {
            keys.remove(key);
            if keys.is_empty() {
                self.entries.remove(&slot);
            }
        }
    }

    /// Keys of `kind` in key order, optionally restricted to a subtree.
    pub fn scan(&self, namespace: &str, kind: &str, ancestor: Option<&Key>) -> KeyIter<'_> {
        let Some(keys) = self
            .entries
            .get(&(namespace.to_string(), kind.to_string()))
        else {
            return Box::new(std::iter::empty());
        };
        match ancestor {
            None => Box::new(keys.iter()),
            Some(ancestor) => {
                let ancestor = ancestor.clone();
                Box::new(
                    keys.range(ancestor.clone()..)
                        .take_while(move |k| k.has_ancestor(&ancestor)),
                )
            }
        }
    }
}

/// Builtin single-property indexes for every indexed property.
#[derive(Debug, Clone, Default)]
pub struct PropertyIndex {
    entries: BTreeMap<(String, String, String), BTreeMap<PropertyValue, BTreeSet<Key>>>,
}

impl PropertyIndex {
    /// Indexes every indexed, non-meta value of `pm`.
    pub fn insert(&mut self, key: &Key, pm: &PropertyMap) {
        for (name, _) in pm.properties() {
            let column = self
                .entries
                .entry(Self::slot(key, name))
                .or_default();
            for value in indexed_values(pm, name) {
                column.entry(value.clone()).or_default().insert(key.clone());
            }
        }
    }

    /// Undoes [`PropertyIndex::insert`] for the same map.
    pub fn remove(&mut self, key: &Key, pm: &PropertyMap) {
        for (name, _) in pm.properties() {
            let slot = Self::slot(key, name);
            let Some(column) = self.entries.get_mut(&slot) else {
                continue;
            };
            for value in indexed_values(pm, name) {
                if let Some(keys) = column.get_mut(value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        column.remove(value);
                    }
                }
            }
            if column.is_empty() {
                self.entries.remove(&slot);
            }
        }
    }

    /// Keys whose `property` falls in `range`, in index order.
    ///
    /// Descending scans walk values from largest to smallest; keys sharing a
    /// value always come out in ascending key order.
    pub fn scan(
        &self,
        namespace: &str,
        kind: &str,
        property: &str,
        range: &ValueRange,
        direction: Direction,
    ) -> KeyIter<'_> {
        if range.is_empty() {
            return Box::new(std::iter::empty());
        }
        let slot = (
            namespace.to_string(),
            kind.to_string(),
            property.to_string(),
        );
        let Some(column) = self.entries.get(&slot) else {
            return Box::new(std::iter::empty());
        };
        let values = column.range(range.bounds());
        let keep = range.clone();
        match direction {
            Direction::Ascending => Box::new(
                values
                    .take_while(move |(v, _)| keep.contains(v))
                    .flat_map(|(_, keys)| keys.iter()),
            ),
            Direction::Descending => Box::new(
                values
                    .rev()
                    .take_while(move |(v, _)| keep.contains(v))
                    .flat_map(|(_, keys)| keys.iter()),
            ),
        }
    }

    fn slot(key: &Key, property: &str) -> (String, String, String) {
        (
            key.namespace().to_string(),
            key.kind().to_string(),
            property.to_string(),
        )
    }
}

/// One value of a composite row, ordered by its column direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cell {
    value: PropertyValue,
    direction: Direction,
}

impl Cell {
    /// Creates a cell.
    #[must_use]
    pub fn new(value: PropertyValue, direction: Direction) -> Self {
        Self { value, direction }
    }

    /// The stored value.
    #[must_use]
    pub fn value(&self) -> &PropertyValue {
        &self.value
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        self.direction
            .cmp(&other.direction)
            .then_with(|| match self.direction {
                Direction::Ascending => self.value.cmp(&other.value),
                Direction::Descending => other.value.cmp(&self.value),
            })
    }
}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Namespace, optional ancestor, then one cell per column.
type RowKey = (String, Option<Key>, Vec<Cell>);

/// A registered composite index.
///
/// Entities missing any column are not in the index. Multi-valued
/// properties produce one row per combination of values, and ancestor
/// indexes repeat every row once per ancestor (the entity included).
#[derive(Clone)]
pub struct CompositeIndex {
    def: IndexDefinition,
    rows: BTreeMap<RowKey, BTreeSet<Key>>,
}

impl CompositeIndex {
    /// An empty index for `def`.
    #[must_use]
    pub fn new(def: IndexDefinition) -> Self {
        Self {
            def,
            rows: BTreeMap::new(),
        }
    }

    /// The definition this index serves.
    #[must_use]
    pub fn definition(&self) -> &IndexDefinition {
        &self.def
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.values().map(BTreeSet::len).sum()
    }

    /// Adds the rows of an entity.
    pub fn insert(&mut self, key: &Key, pm: &PropertyMap) {
        if key.kind() != self.def.kind {
            return;
        }
        for row in self.row_keys(key, pm) {
            self.rows.entry(row).or_default().insert(key.clone());
        }
    }

    /// Removes the rows [`CompositeIndex::insert`] added for the same map.
    pub fn remove(&mut self, key: &Key, pm: &PropertyMap) {
        if key.kind() != self.def.kind {
            return;
        }
        for row in self.row_keys(key, pm) {
            if let Some(keys) = self.rows.get_mut(&row) {
                keys.remove(key);
                if keys.is_empty() {
                    self.rows.remove(&row);
                }
            }
        }
    }

    /// Keys whose leading columns equal `prefix` and whose next column, if
    /// `range` is given, falls inside it. `prefix` is in column order.
    pub fn scan(
        &self,
        namespace: &str,
        ancestor: Option<&Key>,
        prefix: &[PropertyValue],
        range: Option<&ValueRange>,
    ) -> KeyIter<'_> {
        if range.is_some_and(ValueRange::is_empty) {
            return Box::new(std::iter::empty());
        }
        let cells: Vec<Cell> = prefix
            .iter()
            .zip(&self.def.sort_by)
            .map(|(v, col)| Cell::new(v.clone(), col.direction))
            .collect();
        let n = cells.len();
        let start: RowKey = (namespace.to_string(), ancestor.cloned(), cells.clone());
        let ns = namespace.to_string();
        let ancestor = ancestor.cloned();
        let range = range.cloned();

        Box::new(
            self.rows
                .range(start..)
                .take_while(move |((row_ns, row_anc, row_cells), _)| {
                    *row_ns == ns
                        && *row_anc == ancestor
                        && row_cells.len() >= n
                        && row_cells[..n] == cells[..]
                })
                .filter(move |((_, _, row_cells), _)| match &range {
                    None => true,
                    Some(range) => row_cells
                        .get(n)
                        .is_some_and(|cell| range.contains(cell.value())),
                })
                .flat_map(|(_, keys)| keys.iter()),
        )
    }

    fn row_keys(&self, key: &Key, pm: &PropertyMap) -> Vec<RowKey> {
        let mut combos: Vec<Vec<Cell>> = vec![Vec::new()];
        for column in &self.def.sort_by {
            let values = indexed_values(pm, &column.property);
            if values.is_empty() {
                return Vec::new();
            }
            combos = combos
                .into_iter()
                .flat_map(|combo| {
                    values.iter().map(move |v| {
                        let mut next = combo.clone();
                        next.push(Cell::new((*v).clone(), column.direction));
                        next
                    })
                })
                .collect();
        }

        let ancestors: Vec<Option<Key>> = if self.def.ancestor {
            key.path().into_iter().cloned().map(Some).collect()
        } else {
            vec![None]
        };

        let ns = key.namespace().to_string();
        ancestors
            .into_iter()
            .flat_map(|anc| {
                let ns = ns.clone();
                combos
                    .iter()
                    .map(move |cells| (ns.clone(), anc.clone(), cells.clone()))
            })
            .collect()
    }
}

impl fmt::Debug for CompositeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeIndex")
            .field("def", &self.def)
            .field("rows", &self.row_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyContext;
    use crate::property::Property;
    use crate::query::FilterOp;

    fn ctx() -> KeyContext {
        KeyContext::new("dev~app", "")
    }

    fn pm(a: i64, b: &str) -> PropertyMap {
        let mut pm = PropertyMap::new();
        pm.set("A", a).set("B", b);
        pm
    }

    #[test]
    fn kind_scan_respects_ancestor() {
        let ctx = ctx();
        let root = ctx.new_key("Root", 1, None);
        let inside = ctx.new_key("Obj", 1, Some(&root));
        let outside = ctx.new_key("Obj", 2, None);
        let mut idx = KindIndex::default();
        idx.insert(&inside);
        idx.insert(&outside);

        let all: Vec<_> = idx.scan("", "Obj", None).cloned().collect();
        assert_eq!(all.len(), 2);
        let sub: Vec<_> = idx.scan("", "Obj", Some(&root)).cloned().collect();
        assert_eq!(sub, vec![inside.clone()]);

        idx.remove(&inside);
        assert_eq!(idx.scan("", "Obj", Some(&root)).count(), 0);
    }

    #[test]
    fn property_scan_directions() {
        let ctx = ctx();
        let mut idx = PropertyIndex::default();
        let keys: Vec<Key> = (1..=3).map(|i| ctx.new_key("Obj", i, None)).collect();
        for (i, key) in keys.iter().enumerate() {
            idx.insert(key, &pm(i as i64 * 10, "x"));
        }

        let all = ValueRange::default();
        let asc: Vec<_> = idx
            .scan("", "Obj", "A", &all, Direction::Ascending)
            .cloned()
            .collect();
        assert_eq!(asc, keys);
        let desc: Vec<_> = idx
            .scan("", "Obj", "A", &all, Direction::Descending)
            .cloned()
            .collect();
        assert_eq!(desc, keys.iter().rev().cloned().collect::<Vec<_>>());

        let mut gt = ValueRange::default();
        gt.tighten(FilterOp::GreaterThan, &PropertyValue::Int(0));
        let hits: Vec<_> = idx
            .scan("", "Obj", "A", &gt, Direction::Ascending)
            .cloned()
            .collect();
        assert_eq!(hits, keys[1..].to_vec());
    }

    #[test]
    fn inequality_stays_within_type() {
        let ctx = ctx();
        let mut idx = PropertyIndex::default();
        let int_key = ctx.new_key("Obj", 1, None);
        let str_key = ctx.new_key("Obj", 2, None);
        let mut a = PropertyMap::new();
        a.set("A", 5);
        let mut b = PropertyMap::new();
        b.set("A", "five");
        idx.insert(&int_key, &a);
        idx.insert(&str_key, &b);

        let mut gt = ValueRange::default();
        gt.tighten(FilterOp::GreaterThan, &PropertyValue::Int(1));
        let hits: Vec<_> = idx
            .scan("", "Obj", "A", &gt, Direction::Ascending)
            .cloned()
            .collect();
        assert_eq!(hits, vec![int_key]);
    }

    #[test]
    fn unindexed_values_are_skipped() {
        let ctx = ctx();
        let key = ctx.new_key("Obj", 1, None);
        let mut pm = PropertyMap::new();
        pm.set_unindexed("A", 1).set_meta("kind", "Obj");
        let mut idx = PropertyIndex::default();
        idx.insert(&key, &pm);
        assert_eq!(
            idx.scan("", "Obj", "A", &ValueRange::default(), Direction::Ascending)
                .count(),
            0
        );
        assert_eq!(
            idx.scan("", "Obj", "$kind", &ValueRange::default(), Direction::Ascending)
                .count(),
            0
        );
    }

    #[test]
    fn composite_multi_valued_cartesian_rows() {
        let ctx = ctx();
        let key = ctx.new_key("Obj", 1, None);
        let mut pm = PropertyMap::new();
        pm.set_multi("A", vec![Property::new(1), Property::new(2)])
            .set_multi("B", vec![Property::new("x"), Property::new("y")]);
        let mut idx = CompositeIndex::new(IndexDefinition::new("Obj").asc("A").asc("B"));
        idx.insert(&key, &pm);
        assert_eq!(idx.row_count(), 4);

        idx.remove(&key, &pm);
        assert_eq!(idx.row_count(), 0);
    }

    #[test]
    fn composite_missing_column_is_not_indexed() {
        let ctx = ctx();
        let mut pm = PropertyMap::new();
        pm.set("A", 1);
        let mut idx = CompositeIndex::new(IndexDefinition::new("Obj").asc("A").asc("B"));
        idx.insert(&ctx.new_key("Obj", 1, None), &pm);
        assert_eq!(idx.row_count(), 0);
    }

    #[test]
    fn composite_prefix_and_descending_order() {
        let ctx = ctx();
        let mut idx = CompositeIndex::new(IndexDefinition::new("Obj").asc("B").desc("A"));
        let k1 = ctx.new_key("Obj", 1, None);
        let k2 = ctx.new_key("Obj", 2, None);
        let k3 = ctx.new_key("Obj", 3, None);
        idx.insert(&k1, &pm(1, "x"));
        idx.insert(&k2, &pm(3, "x"));
        idx.insert(&k3, &pm(2, "y"));

        let hits: Vec<_> = idx
            .scan("", None, &[PropertyValue::from("x")], None)
            .cloned()
            .collect();
        assert_eq!(hits, vec![k2.clone(), k1.clone()]);

        let mut lt = ValueRange::default();
        lt.tighten(FilterOp::LessThan, &PropertyValue::Int(3));
        let hits: Vec<_> = idx
            .scan("", None, &[PropertyValue::from("x")], Some(&lt))
            .cloned()
            .collect();
        assert_eq!(hits, vec![k1]);
    }

    #[test]
    fn ancestor_rows_cover_every_ancestor() {
        let ctx = ctx();
        let root = ctx.new_key("Root", 1, None);
        let mid = ctx.new_key("Mid", 1, Some(&root));
        let leaf = ctx.new_key("Obj", 1, Some(&mid));
        let mut idx = CompositeIndex::new(IndexDefinition::new("Obj").with_ancestor().asc("A"));
        idx.insert(&leaf, &pm(1, "x"));
        assert_eq!(idx.row_count(), 3);
        assert_eq!(idx.scan("", Some(&root), &[], None).count(), 1);
        assert_eq!(idx.scan("", Some(&mid), &[], None).count(), 1);
        let other = ctx.new_key("Root", 2, None);
        assert_eq!(idx.scan("", Some(&other), &[], None).count(), 0);
    }
}
