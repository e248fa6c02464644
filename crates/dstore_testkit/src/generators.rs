//! Property-based test generators using proptest.
//!
//! Strategies produce values the datastore accepts: valid keys, property
//! names without the meta prefix and floats that are never NaN.

use dstore_core::{Key, KeyContext, Property, PropertyMap, PropertyValue};
use proptest::prelude::*;

/// Application id used by generated keys.
pub const TEST_APP_ID: &str = "dev~app";

/// Strategy for kind names.
pub fn kind_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-zA-Z0-9]{0,11}").expect("Invalid regex")
}

/// Strategy for property names. Never starts with the meta prefix.
pub fn property_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for complete keys, optionally with one parent.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    let id = prop_oneof![
        (1..i64::MAX).prop_map(dstore_core::KeyId::Int),
        prop::string::string_regex("[a-z][a-z0-9]{0,7}")
            .expect("Invalid regex")
            .prop_map(dstore_core::KeyId::Name),
    ];
    (
        prop::option::of((kind_strategy(), 1..1_000i64)),
        kind_strategy(),
        id,
    )
        .prop_map(|(parent, kind, id)| {
            let ctx = KeyContext::new(TEST_APP_ID, "");
            let parent = parent.map(|(kind, id)| ctx.new_key(kind, id, None));
            ctx.new_key(kind, id, parent.as_ref())
        })
}

/// Strategy for property values of every type.
pub fn property_value_strategy() -> impl Strategy<Value = PropertyValue> {
    prop_oneof![
        Just(PropertyValue::Null),
        any::<i64>().prop_map(PropertyValue::Int),
        any::<bool>().prop_map(PropertyValue::Bool),
        ".{0,24}".prop_map(PropertyValue::String),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(PropertyValue::Bytes),
        any::<f64>()
            .prop_filter("NaN is not storable", |f| !f.is_nan())
            .prop_map(PropertyValue::Float),
        any::<i64>().prop_map(PropertyValue::Time),
        key_strategy().prop_map(PropertyValue::Key),
    ]
}

/// Strategy for a property: a value and whether it is indexed.
pub fn property_strategy() -> impl Strategy<Value = Property> {
    (property_value_strategy(), any::<bool>()).prop_map(|(value, indexed)| {
        if indexed {
            Property::new(value)
        } else {
            Property::unindexed(value)
        }
    })
}

/// Strategy for property maps without meta entries.
pub fn property_map_strategy() -> impl Strategy<Value = PropertyMap> {
    prop::collection::btree_map(
        property_name_strategy(),
        prop::collection::vec(property_strategy(), 1..4),
        0..8,
    )
    .prop_map(|props| {
        let mut pm = PropertyMap::new();
        for (name, values) in props {
            pm.set_multi(name, values);
        }
        pm
    })
}

/// One step of a generated workload.
#[derive(Debug, Clone)]
pub enum EntityOperation {
    /// Put `Obj/id` with `Value` = `value`.
    Put {
        /// Entity id
        id: i64,
        /// Stored value
        value: i64,
    },
    /// Delete `Obj/id`.
    Delete {
        /// Entity id
        id: i64,
    },
    /// Get `Obj/id`.
    Get {
        /// Entity id
        id: i64,
    },
}

/// Strategy for operations over a small key space, so operations collide.
pub fn entity_operation_strategy(ids: i64) -> impl Strategy<Value = EntityOperation> {
    prop_oneof![
        3 => (1..=ids, any::<i64>()).prop_map(|(id, value)| EntityOperation::Put { id, value }),
        1 => (1..=ids).prop_map(|id| EntityOperation::Delete { id }),
        3 => (1..=ids).prop_map(|id| EntityOperation::Get { id }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    ids: i64,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<EntityOperation>> {
    prop::collection::vec(entity_operation_strategy(ids), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn keys_are_valid(key in key_strategy()) {
            let ctx = KeyContext::new(TEST_APP_ID, "");
            prop_assert!(key.valid(false, &ctx).is_ok());
            prop_assert!(!key.is_incomplete());
        }

        #[test]
        fn property_names_are_not_meta(pm in property_map_strategy()) {
            for (name, values) in pm.iter() {
                prop_assert!(!dstore_core::is_meta(name));
                prop_assert!(!values.is_empty());
            }
        }
    }
}
