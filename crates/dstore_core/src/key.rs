//! Datastore keys.
//!
//! A [`Key`] names an entity by application, namespace and a path of
//! `(kind, id)` elements from the root of its entity group down to the entity
//! itself. Keys are immutable and cheap to clone.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};

/// The id part of one key element.
///
/// Variant order is the datastore sort order: incomplete ids first, then
/// integer ids, then string names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyId {
    /// Not assigned yet; the datastore allocates an integer id on put.
    Incomplete,
    /// Integer id (always positive once valid).
    Int(i64),
    /// String name (never empty once valid).
    Name(String),
}

impl From<i64> for KeyId {
    fn from(id: i64) -> Self {
        KeyId::Int(id)
    }
}

impl From<i32> for KeyId {
    fn from(id: i32) -> Self {
        KeyId::Int(i64::from(id))
    }
}

impl From<&str> for KeyId {
    fn from(name: &str) -> Self {
        KeyId::Name(name.to_string())
    }
}

impl From<String> for KeyId {
    fn from(name: String) -> Self {
        KeyId::Name(name)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Incomplete => write!(f, "0"),
            KeyId::Int(id) => write!(f, "{id}"),
            KeyId::Name(name) => write!(f, "{name:?}"),
        }
    }
}

#[derive(PartialEq, Eq, Hash)]
struct KeyInner {
    app_id: String,
    namespace: String,
    kind: String,
    id: KeyId,
    parent: Option<Key>,
}

/// A datastore key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key {
    inner: Arc<KeyInner>,
}

impl Key {
    /// Creates a key. Validation happens separately, see [`Key::valid`].
    pub fn new(
        app_id: impl Into<String>,
        namespace: impl Into<String>,
        kind: impl Into<String>,
        id: KeyId,
        parent: Option<Key>,
    ) -> Self {
        Self {
            inner: Arc::new(KeyInner {
                app_id: app_id.into(),
                namespace: namespace.into(),
                kind: kind.into(),
                id,
                parent,
            }),
        }
    }

    /// Application id.
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.inner.app_id
    }

    /// Namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Kind of the last element.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    /// Id of the last element.
    #[must_use]
    pub fn id(&self) -> &KeyId {
        &self.inner.id
    }

    /// Integer id of the last element, if it has one.
    #[must_use]
    pub fn int_id(&self) -> Option<i64> {
        match self.inner.id {
            KeyId::Int(id) => Some(id),
            _ => None,
        }
    }

    /// String name of the last element, if it has one.
    #[must_use]
    pub fn string_id(&self) -> Option<&str> {
        match &self.inner.id {
            KeyId::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Parent key.
    #[must_use]
    pub fn parent(&self) -> Option<&Key> {
        self.inner.parent.as_ref()
    }

    /// Root of the path, which identifies the entity group.
    #[must_use]
    pub fn root(&self) -> &Key {
        let mut cur = self;
        while let Some(parent) = cur.parent() {
            cur = parent;
        }
        cur
    }

    /// True when the last element still needs an id.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.inner.id == KeyId::Incomplete
    }

    /// Same app, namespace, kind and parent with a different id.
    #[must_use]
    pub fn with_id(&self, id: KeyId) -> Key {
        Key::new(
            self.app_id(),
            self.namespace(),
            self.kind(),
            id,
            self.inner.parent.clone(),
        )
    }

    /// Path elements from the root down to this key.
    #[must_use]
    pub fn path(&self) -> Vec<&Key> {
        let mut path = Vec::new();
        let mut cur = Some(self);
        while let Some(key) = cur {
            path.push(key);
            cur = key.parent();
        }
        path.reverse();
        path
    }

    /// True if `ancestor` is this key or one of its ancestors.
    #[must_use]
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        let mut cur = Some(self);
        while let Some(key) = cur {
            if key == ancestor {
                return true;
            }
            cur = key.parent();
        }
        false
    }

    /// Checks that the key is complete and belongs to `ctx`.
    ///
    /// Kinds starting with `__` are reserved and only accepted when
    /// `allow_special` is set.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] describing the first problem found.
    pub fn valid(&self, allow_special: bool, ctx: &KeyContext) -> CoreResult<()> {
        self.check(allow_special, ctx, false)
    }

    /// Like [`Key::valid`], but the last element may be incomplete.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] describing the first problem found.
    pub fn partial_valid(&self, ctx: &KeyContext) -> CoreResult<()> {
        self.check(false, ctx, true)
    }

    fn check(&self, allow_special: bool, ctx: &KeyContext, allow_incomplete: bool) -> CoreResult<()> {
        for (depth, element) in self.path().into_iter().rev().enumerate() {
            if element.app_id() != ctx.app_id {
                return Err(CoreError::invalid_key(format!(
                    "app id {:?} does not match {:?}",
                    element.app_id(),
                    ctx.app_id
                )));
            }
            if element.namespace() != ctx.namespace {
                return Err(CoreError::invalid_key(format!(
                    "namespace {:?} does not match {:?}",
                    element.namespace(),
                    ctx.namespace
                )));
            }
            if element.kind().is_empty() {
                return Err(CoreError::invalid_key("empty kind"));
            }
            if element.kind().starts_with("__") && !allow_special {
                return Err(CoreError::invalid_key(format!(
                    "reserved kind {:?}",
                    element.kind()
                )));
            }
            match element.id() {
                KeyId::Incomplete if !(allow_incomplete && depth == 0) => {
                    return Err(CoreError::invalid_key(format!("incomplete key {self}")));
                }
                KeyId::Int(id) if *id <= 0 => {
                    return Err(CoreError::invalid_key(format!("non-positive id {id}")));
                }
                KeyId::Name(name) if name.is_empty() => {
                    return Err(CoreError::invalid_key("empty name"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.app_id()
            .cmp(other.app_id())
            .then_with(|| self.namespace().cmp(other.namespace()))
            .then_with(|| {
                let a = self.path();
                let b = other.path();
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.kind().cmp(y.kind()).then_with(|| x.id().cmp(y.id()));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            })
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.path() {
            write!(f, "/{},{}", element.kind(), element.id())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({}:{}:{self})", self.app_id(), self.namespace())
    }
}

/// Application id and namespace that new keys are created in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyContext {
    /// Application id.
    pub app_id: String,
    /// Namespace.
    pub namespace: String,
}

impl KeyContext {
    /// Creates a key context.
    pub fn new(app_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            namespace: namespace.into(),
        }
    }

    /// Creates a key in this context.
    pub fn new_key(&self, kind: impl Into<String>, id: impl Into<KeyId>, parent: Option<&Key>) -> Key {
        Key::new(
            self.app_id.clone(),
            self.namespace.clone(),
            kind,
            id.into(),
            parent.cloned(),
        )
    }

    /// Creates a key whose id will be allocated on put.
    pub fn incomplete_key(&self, kind: impl Into<String>, parent: Option<&Key>) -> Key {
        Key::new(
            self.app_id.clone(),
            self.namespace.clone(),
            kind,
            KeyId::Incomplete,
            parent.cloned(),
        )
    }

    /// Same context with another namespace.
    #[must_use]
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        Self::new(self.app_id.clone(), namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> KeyContext {
        KeyContext::new("dev~app", "")
    }

    #[test]
    fn display_path() {
        let ctx = ctx();
        let parent = ctx.new_key("Parent", 1, None);
        let child = ctx.new_key("Child", "leaf", Some(&parent));
        assert_eq!(child.to_string(), "/Parent,1/Child,\"leaf\"");
        assert_eq!(format!("{child:?}"), "Key(dev~app::/Parent,1/Child,\"leaf\")");
    }

    #[test]
    fn root_and_ancestry() {
        let ctx = ctx();
        let root = ctx.new_key("A", 1, None);
        let mid = ctx.new_key("B", 2, Some(&root));
        let leaf = ctx.new_key("C", "x", Some(&mid));

        assert_eq!(leaf.root(), &root);
        assert!(leaf.has_ancestor(&root));
        assert!(leaf.has_ancestor(&mid));
        assert!(leaf.has_ancestor(&leaf));
        assert!(!root.has_ancestor(&leaf));
        assert_eq!(leaf.path().len(), 3);
    }

    #[test]
    fn id_order_incomplete_int_name() {
        let ctx = ctx();
        let incomplete = ctx.incomplete_key("K", None);
        let int = ctx.new_key("K", 99, None);
        let name = ctx.new_key("K", "a", None);
        assert!(incomplete < int);
        assert!(int < name);
    }

    #[test]
    fn subtree_is_contiguous() {
        let ctx = ctx();
        let a = ctx.new_key("A", 1, None);
        let a_child = ctx.new_key("Z", 5, Some(&a));
        let a_grandchild = ctx.new_key("B", 1, Some(&a_child));
        let a2 = ctx.new_key("A", 2, None);

        let mut keys = vec![a2.clone(), a_grandchild.clone(), a.clone(), a_child.clone()];
        keys.sort();
        assert_eq!(keys, vec![a, a_child, a_grandchild, a2]);
    }

    #[test]
    fn namespace_orders_before_path() {
        let k1 = KeyContext::new("app", "a").new_key("Z", 1, None);
        let k2 = KeyContext::new("app", "b").new_key("A", 1, None);
        assert!(k1 < k2);
    }

    #[test]
    fn validation() {
        let ctx = ctx();
        assert!(ctx.new_key("K", 1, None).valid(false, &ctx).is_ok());
        assert!(ctx.new_key("K", 0, None).valid(false, &ctx).is_err());
        assert!(ctx.new_key("K", "", None).valid(false, &ctx).is_err());
        assert!(ctx.new_key("", 1, None).valid(false, &ctx).is_err());
        assert!(ctx.new_key("__kind__", "K", None).valid(false, &ctx).is_err());
        assert!(ctx.new_key("__kind__", "K", None).valid(true, &ctx).is_ok());

        let other = KeyContext::new("other", "");
        assert!(other.new_key("K", 1, None).valid(false, &ctx).is_err());
        let other_ns = ctx.with_namespace("ns");
        assert!(other_ns.new_key("K", 1, None).valid(false, &ctx).is_err());
    }

    #[test]
    fn incomplete_keys_are_only_partially_valid() {
        let ctx = ctx();
        let parent = ctx.new_key("P", 1, None);
        let key = ctx.incomplete_key("K", Some(&parent));
        assert!(key.valid(false, &ctx).is_err());
        assert!(key.partial_valid(&ctx).is_ok());

        let bad_parent = ctx.incomplete_key("P", None);
        let key = ctx.incomplete_key("K", Some(&bad_parent));
        assert!(key.partial_valid(&ctx).is_err());
    }

    #[test]
    fn with_id_keeps_parent() {
        let ctx = ctx();
        let parent = ctx.new_key("P", 1, None);
        let key = ctx.incomplete_key("K", Some(&parent)).with_id(KeyId::Int(7));
        assert_eq!(key.parent(), Some(&parent));
        assert_eq!(key.int_id(), Some(7));
        assert_eq!(key.string_id(), None);
    }
}
