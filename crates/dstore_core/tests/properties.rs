//! Ordering and encoding properties of keys and property maps.

use dstore_core::serialize::{decode_key, decode_property_map, encode_key, encode_property_map};
use dstore_core::{Key, KeyContext, KeyId, Property, PropertyMap, PropertyValue};
use proptest::prelude::*;

fn ctx() -> KeyContext {
    KeyContext::new("dev~app", "")
}

fn kind() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{0,5}").unwrap()
}

fn id() -> impl Strategy<Value = KeyId> {
    prop_oneof![
        (1..1_000i64).prop_map(KeyId::Int),
        prop::string::string_regex("[a-z]{1,6}")
            .unwrap()
            .prop_map(KeyId::Name),
    ]
}

fn element() -> impl Strategy<Value = (String, KeyId)> {
    (kind(), id())
}

fn key_from(path: &[(String, KeyId)]) -> Option<Key> {
    let ctx = ctx();
    let mut key: Option<Key> = None;
    for (kind, id) in path {
        key = Some(ctx.new_key(kind.as_str(), id.clone(), key.as_ref()));
    }
    key
}

fn value() -> impl Strategy<Value = PropertyValue> {
    prop_oneof![
        Just(PropertyValue::Null),
        any::<i64>().prop_map(PropertyValue::Int),
        any::<bool>().prop_map(PropertyValue::Bool),
        "[ -~]{0,12}".prop_map(PropertyValue::String),
        prop::collection::vec(any::<u8>(), 0..12).prop_map(PropertyValue::Bytes),
        (-1.0e12..1.0e12f64).prop_map(PropertyValue::Float),
        any::<i64>().prop_map(PropertyValue::Time),
        prop::collection::vec(element(), 1..3)
            .prop_map(|path| PropertyValue::Key(key_from(&path).unwrap())),
    ]
}

fn property_map() -> impl Strategy<Value = PropertyMap> {
    prop::collection::btree_map(
        "[a-zA-Z][a-zA-Z0-9]{0,7}",
        prop::collection::vec((value(), any::<bool>()), 1..3),
        0..6,
    )
    .prop_map(|props| {
        let mut pm = PropertyMap::new();
        for (name, values) in props {
            let values = values
                .into_iter()
                .map(|(v, indexed)| if indexed { Property::new(v) } else { Property::unindexed(v) })
                .collect();
            pm.set_multi(name, values);
        }
        pm
    })
}

proptest! {
    #[test]
    fn ancestors_sort_before_their_subtree(
        parent in prop::collection::vec(element(), 1..3),
        child in element(),
        other in prop::collection::vec(element(), 1..3),
    ) {
        let parent_key = key_from(&parent).unwrap();
        let child_key = ctx().new_key(child.0.as_str(), child.1.clone(), Some(&parent_key));
        let other_key = key_from(&other).unwrap();

        prop_assert!(parent_key < child_key);
        prop_assert!(child_key.has_ancestor(&parent_key));
        prop_assert_eq!(child_key.root(), parent_key.root());

        // The subtree is contiguous: nothing outside it sorts between the
        // parent and its child.
        if !other_key.has_ancestor(&parent_key) {
            prop_assert!(!(parent_key < other_key && other_key < child_key));
        }
    }

    #[test]
    fn keys_round_trip(path in prop::collection::vec(element(), 1..4)) {
        let key = key_from(&path).unwrap();
        let bytes = encode_key(&key).unwrap();
        prop_assert_eq!(decode_key(&bytes).unwrap(), key);
    }

    #[test]
    fn property_maps_round_trip(pm in property_map()) {
        let bytes = encode_property_map(&pm).unwrap();
        prop_assert_eq!(decode_property_map(&bytes).unwrap(), pm);
    }
}
