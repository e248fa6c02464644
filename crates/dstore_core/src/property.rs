//! Property values and property maps.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{CoreError, CoreResult};
use crate::key::{Key, KeyContext, KeyId};

/// Prefix of meta entries such as `$key` or `$kind`.
pub const META_PREFIX: char = '$';

/// A single typed property value.
///
/// Values of different types order by type first, using the datastore type
/// order `Null < Int < Time < Bool < String < Bytes < Float < Key`. Floats
/// compare with [`f64::total_cmp`], so equality is bitwise.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    /// Explicit null.
    Null,
    /// 64-bit signed integer.
    Int(i64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    String(String),
    /// Opaque bytes.
    Bytes(Vec<u8>),
    /// 64-bit float.
    Float(f64),
    /// Microseconds since the Unix epoch.
    Time(i64),
    /// Reference to another entity.
    Key(Key),
}

impl PropertyValue {
    /// Time value from a [`SystemTime`], truncated to microseconds.
    #[must_use]
    pub fn time(at: SystemTime) -> Self {
        let micros = match at.duration_since(UNIX_EPOCH) {
            Ok(d) => i64::try_from(d.as_micros()).unwrap_or(i64::MAX),
            Err(e) => i64::try_from(e.duration().as_micros()).map_or(i64::MIN, |m| -m),
        };
        PropertyValue::Time(micros)
    }

    /// Position of this value's type in the cross-type sort order.
    #[must_use]
    pub fn type_rank(&self) -> u8 {
        match self {
            PropertyValue::Null => 0,
            PropertyValue::Int(_) => 1,
            PropertyValue::Time(_) => 2,
            PropertyValue::Bool(_) => 3,
            PropertyValue::String(_) => 4,
            PropertyValue::Bytes(_) => 5,
            PropertyValue::Float(_) => 6,
            PropertyValue::Key(_) => 7,
        }
    }

    /// Integer content, if this is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// String content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Key content, if this is a key.
    #[must_use]
    pub fn as_key(&self) -> Option<&Key> {
        match self {
            PropertyValue::Key(k) => Some(k),
            _ => None,
        }
    }
}

impl Ord for PropertyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use PropertyValue as V;
        match (self, other) {
            (V::Null, V::Null) => Ordering::Equal,
            (V::Int(a), V::Int(b)) | (V::Time(a), V::Time(b)) => a.cmp(b),
            (V::Bool(a), V::Bool(b)) => a.cmp(b),
            (V::String(a), V::String(b)) => a.cmp(b),
            (V::Bytes(a), V::Bytes(b)) => a.cmp(b),
            (V::Float(a), V::Float(b)) => a.total_cmp(b),
            (V::Key(a), V::Key(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialOrd for PropertyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PropertyValue {}

impl Hash for PropertyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            PropertyValue::Null => {}
            PropertyValue::Int(n) | PropertyValue::Time(n) => n.hash(state),
            PropertyValue::Bool(b) => b.hash(state),
            PropertyValue::String(s) => s.hash(state),
            PropertyValue::Bytes(b) => b.hash(state),
            PropertyValue::Float(f) => f.to_bits().hash(state),
            PropertyValue::Key(k) => k.hash(state),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        PropertyValue::Int(n)
    }
}

impl From<i32> for PropertyValue {
    fn from(n: i32) -> Self {
        PropertyValue::Int(i64::from(n))
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        PropertyValue::Float(f)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(b: Vec<u8>) -> Self {
        PropertyValue::Bytes(b)
    }
}

impl From<Key> for PropertyValue {
    fn from(k: Key) -> Self {
        PropertyValue::Key(k)
    }
}

/// A value plus its indexing flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Property {
    value: PropertyValue,
    indexed: bool,
}

impl Property {
    /// An indexed property.
    pub fn new(value: impl Into<PropertyValue>) -> Self {
        Self {
            value: value.into(),
            indexed: true,
        }
    }

    /// A property that is stored but never indexed.
    pub fn unindexed(value: impl Into<PropertyValue>) -> Self {
        Self {
            value: value.into(),
            indexed: false,
        }
    }

    /// The value.
    #[must_use]
    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    /// Whether the value participates in indexes.
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }
}

/// Ordered mapping from property name to a non-empty list of properties.
///
/// Names starting with `$` are meta entries: they travel with the map but are
/// never indexed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertyMap {
    props: BTreeMap<String, Vec<Property>>,
}

impl PropertyMap {
    /// An empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to a single indexed value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> &mut Self {
        self.props.insert(name.into(), vec![Property::new(value)]);
        self
    }

    /// Sets `name` to a single unindexed value.
    pub fn set_unindexed(
        &mut self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> &mut Self {
        self.props.insert(name.into(), vec![Property::unindexed(value)]);
        self
    }

    /// Sets `name` to several values. An empty list removes the property.
    pub fn set_multi(&mut self, name: impl Into<String>, values: Vec<Property>) -> &mut Self {
        let name = name.into();
        if values.is_empty() {
            self.props.remove(&name);
        } else {
            self.props.insert(name, values);
        }
        self
    }

    /// Every property stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[Property]> {
        self.props.get(name).map(Vec::as_slice)
    }

    /// First value stored under `name`.
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&PropertyValue> {
        self.props
            .get(name)
            .and_then(|values| values.first())
            .map(Property::value)
    }

    /// Removes `name`, returning its properties.
    pub fn remove(&mut self, name: &str) -> Option<Vec<Property>> {
        self.props.remove(name)
    }

    /// Iterates in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Property])> {
        self.props.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Iterates the regular (non-meta) properties.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &[Property])> {
        self.iter().filter(|(name, _)| !is_meta(name))
    }

    /// Number of entries, meta entries included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.props.len()
    }

    /// True when there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Meta value `$name`.
    #[must_use]
    pub fn meta(&self, name: &str) -> Option<&PropertyValue> {
        self.first(&format!("{META_PREFIX}{name}"))
    }

    /// Sets meta value `$name`.
    pub fn set_meta(&mut self, name: &str, value: impl Into<PropertyValue>) -> &mut Self {
        self.props.insert(
            format!("{META_PREFIX}{name}"),
            vec![Property::unindexed(value)],
        );
        self
    }

    /// Copy without any meta entries.
    #[must_use]
    pub fn without_meta(&self) -> PropertyMap {
        Self {
            props: self
                .props
                .iter()
                .filter(|(name, _)| !is_meta(name))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Copy keeping only the meta entries.
    #[must_use]
    pub fn meta_only(&self) -> PropertyMap {
        Self {
            props: self
                .props
                .iter()
                .filter(|(name, _)| is_meta(name))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Resolves the identity of this entity from its meta entries.
    ///
    /// `$key` wins when present. Otherwise the key is built from `$kind`,
    /// an optional `$id` (integer or string; missing or zero means
    /// incomplete) and an optional `$parent`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] when no kind can be found or a meta
    /// entry has the wrong type.
    pub fn key(&self, ctx: &KeyContext) -> CoreResult<Key> {
        if let Some(value) = self.meta("key") {
            return value
                .as_key()
                .cloned()
                .ok_or_else(|| CoreError::invalid_key("$key must hold a key"));
        }

        let kind = self
            .meta("kind")
            .ok_or_else(|| CoreError::invalid_key("missing $kind"))?
            .as_str()
            .ok_or_else(|| CoreError::invalid_key("$kind must be a string"))?;

        let id = match self.meta("id") {
            None | Some(PropertyValue::Int(0)) => KeyId::Incomplete,
            Some(PropertyValue::Int(id)) => KeyId::Int(*id),
            Some(PropertyValue::String(name)) => KeyId::Name(name.clone()),
            Some(_) => return Err(CoreError::invalid_key("$id must be an integer or string")),
        };

        let parent = match self.meta("parent") {
            None | Some(PropertyValue::Null) => None,
            Some(PropertyValue::Key(parent)) => Some(parent),
            Some(_) => return Err(CoreError::invalid_key("$parent must hold a key")),
        };

        Ok(ctx.new_key(kind, id, parent))
    }
}

impl FromIterator<(String, Vec<Property>)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (String, Vec<Property>)>>(iter: I) -> Self {
        let mut map = PropertyMap::new();
        for (name, values) in iter {
            map.set_multi(name, values);
        }
        map
    }
}

/// True for meta entry names.
#[must_use]
pub fn is_meta(name: &str) -> bool {
    name.starts_with(META_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_type_order() {
        let ctx = KeyContext::new("dev~app", "");
        let ordered = vec![
            PropertyValue::Null,
            PropertyValue::Int(i64::MAX),
            PropertyValue::Time(-5),
            PropertyValue::Bool(false),
            PropertyValue::String("a".into()),
            PropertyValue::Bytes(vec![]),
            PropertyValue::Float(f64::NEG_INFINITY),
            PropertyValue::Key(ctx.new_key("K", 1, None)),
        ];
        let mut shuffled = ordered.clone();
        shuffled.reverse();
        shuffled.sort();
        assert_eq!(shuffled, ordered);
    }

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(PropertyValue::Float(1.5), PropertyValue::Float(1.5));
        assert_ne!(PropertyValue::Float(0.0), PropertyValue::Float(-0.0));
        assert!(PropertyValue::Float(-0.0) < PropertyValue::Float(0.0));
    }

    #[test]
    fn empty_multi_removes() {
        let mut pm = PropertyMap::new();
        pm.set("A", 1);
        pm.set_multi("A", vec![]);
        assert!(pm.get("A").is_none());
        assert!(pm.is_empty());
    }

    #[test]
    fn meta_entries_are_separate() {
        let mut pm = PropertyMap::new();
        pm.set("Value", 3).set_meta("kind", "Obj");
        assert_eq!(pm.meta("kind"), Some(&PropertyValue::from("Obj")));
        assert_eq!(pm.properties().count(), 1);
        assert_eq!(pm.without_meta().len(), 1);
        assert_eq!(pm.meta_only().len(), 1);
        assert!(!pm.get("$kind").unwrap()[0].is_indexed());
    }

    #[test]
    fn key_from_meta() {
        let ctx = KeyContext::new("dev~app", "");
        let parent = ctx.new_key("Parent", 1, None);

        let mut pm = PropertyMap::new();
        pm.set_meta("kind", "Obj")
            .set_meta("id", 5)
            .set_meta("parent", parent.clone());
        assert_eq!(pm.key(&ctx).unwrap(), ctx.new_key("Obj", 5, Some(&parent)));

        let mut incomplete = PropertyMap::new();
        incomplete.set_meta("kind", "Thing");
        assert!(incomplete.key(&ctx).unwrap().is_incomplete());

        let explicit = ctx.new_key("Other", "x", None);
        pm.set_meta("key", explicit.clone());
        assert_eq!(pm.key(&ctx).unwrap(), explicit);
    }

    #[test]
    fn key_needs_kind() {
        let ctx = KeyContext::new("dev~app", "");
        let err = PropertyMap::new().key(&ctx).unwrap_err();
        assert!(matches!(err, CoreError::InvalidKey { .. }));

        let mut bad = PropertyMap::new();
        bad.set_meta("kind", 3);
        assert!(bad.key(&ctx).is_err());
    }

    #[test]
    fn time_truncates_to_micros() {
        let at = UNIX_EPOCH + std::time::Duration::from_nanos(1_500_999);
        assert_eq!(PropertyValue::time(at), PropertyValue::Time(1_500));
    }
}
