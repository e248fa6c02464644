//! Canonical byte forms of keys and property maps.
//!
//! Property maps become a CBOR map from name to an array of values.
//! Unindexed values are wrapped in [`TAG_UNINDEXED`]; times and keys use
//! their own private tags so every [`PropertyValue`] round-trips exactly.

use dstore_codec::{from_cbor, to_canonical_cbor, CodecError, Value};

use crate::error::CoreResult;
use crate::key::{Key, KeyId};
use crate::property::{Property, PropertyMap, PropertyValue};

/// Tag for time values (microseconds since the epoch).
pub const TAG_TIME: u64 = 40_000;
/// Tag for key values.
pub const TAG_KEY: u64 = 40_001;
/// Tag wrapping values that are stored but not indexed.
pub const TAG_UNINDEXED: u64 = 40_002;

/// Encodes a key to its CBOR value.
pub fn key_to_value(key: &Key) -> Value {
    let path = key
        .path()
        .into_iter()
        .map(|element| {
            let id = match element.id() {
                KeyId::Incomplete => Value::Null,
                KeyId::Int(id) => Value::Integer(*id),
                KeyId::Name(name) => Value::Text(name.clone()),
            };
            Value::Array(vec![Value::Text(element.kind().to_string()), id])
        })
        .collect();
    Value::tag(
        TAG_KEY,
        Value::Array(vec![
            Value::Text(key.app_id().to_string()),
            Value::Text(key.namespace().to_string()),
            Value::Array(path),
        ]),
    )
}

/// Decodes a key from its CBOR value.
///
/// # Errors
///
/// Fails if the value does not have the layout produced by [`key_to_value`].
pub fn key_from_value(value: &Value) -> CoreResult<Key> {
    let bad = || CodecError::decoding_failed("malformed key");
    let (tag, inner) = value.as_tag().ok_or_else(bad)?;
    if tag != TAG_KEY {
        return Err(bad().into());
    }
    let parts = inner.as_array().ok_or_else(bad)?;
    let [app, ns, path] = parts else {
        return Err(bad().into());
    };
    let app = app.as_text().ok_or_else(bad)?;
    let ns = ns.as_text().ok_or_else(bad)?;
    let path = path.as_array().ok_or_else(bad)?;
    if path.is_empty() {
        return Err(bad().into());
    }

    let mut key: Option<Key> = None;
    for element in path {
        let Some([kind, id]) = element.as_array() else {
            return Err(bad().into());
        };
        let kind = kind.as_text().ok_or_else(bad)?;
        let id = match id {
            Value::Null => KeyId::Incomplete,
            Value::Integer(n) => KeyId::Int(*n),
            Value::Text(name) => KeyId::Name(name.clone()),
            _ => return Err(bad().into()),
        };
        key = Some(Key::new(app, ns, kind, id, key.take()));
    }
    key.ok_or_else(|| bad().into())
}

/// Encodes a property value.
pub fn property_value_to_value(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Null => Value::Null,
        PropertyValue::Int(n) => Value::Integer(*n),
        PropertyValue::Bool(b) => Value::Bool(*b),
        PropertyValue::String(s) => Value::Text(s.clone()),
        PropertyValue::Bytes(b) => Value::Bytes(b.clone()),
        PropertyValue::Float(f) => Value::Float(*f),
        PropertyValue::Time(t) => Value::tag(TAG_TIME, Value::Integer(*t)),
        PropertyValue::Key(k) => key_to_value(k),
    }
}

/// Decodes a property value.
///
/// # Errors
///
/// Fails on CBOR types that have no property counterpart.
pub fn property_value_from_value(value: &Value) -> CoreResult<PropertyValue> {
    Ok(match value {
        Value::Null => PropertyValue::Null,
        Value::Integer(n) => PropertyValue::Int(*n),
        Value::Bool(b) => PropertyValue::Bool(*b),
        Value::Text(s) => PropertyValue::String(s.clone()),
        Value::Bytes(b) => PropertyValue::Bytes(b.clone()),
        Value::Float(f) => PropertyValue::Float(*f),
        Value::Tag(TAG_TIME, inner) => PropertyValue::Time(
            inner
                .as_integer()
                .ok_or_else(|| CodecError::decoding_failed("malformed time"))?,
        ),
        Value::Tag(TAG_KEY, _) => PropertyValue::Key(key_from_value(value)?),
        other => {
            return Err(CodecError::unsupported_type(format!("property value {other:?}")).into())
        }
    })
}

/// Encodes a property map to its CBOR value.
pub fn property_map_to_value(pm: &PropertyMap) -> Value {
    Value::map(
        pm.iter()
            .map(|(name, props)| {
                let values = props
                    .iter()
                    .map(|p| {
                        let v = property_value_to_value(p.value());
                        if p.is_indexed() {
                            v
                        } else {
                            Value::tag(TAG_UNINDEXED, v)
                        }
                    })
                    .collect();
                (Value::Text(name.to_string()), Value::Array(values))
            })
            .collect(),
    )
}

/// Decodes a property map from its CBOR value.
///
/// # Errors
///
/// Fails if the layout is wrong or a property list is empty.
pub fn property_map_from_value(value: &Value) -> CoreResult<PropertyMap> {
    let pairs = value
        .as_map()
        .ok_or_else(|| CodecError::decoding_failed("property map must be a CBOR map"))?;
    let mut pm = PropertyMap::new();
    for (name, values) in pairs {
        let name = name
            .as_text()
            .ok_or_else(|| CodecError::decoding_failed("property name must be text"))?;
        let values = values
            .as_array()
            .ok_or_else(|| CodecError::decoding_failed("property values must be an array"))?;
        if values.is_empty() {
            return Err(CodecError::decoding_failed(format!("property {name:?} has no values")).into());
        }
        let props = values
            .iter()
            .map(|v| match v {
                Value::Tag(TAG_UNINDEXED, inner) => {
                    property_value_from_value(inner).map(Property::unindexed)
                }
                _ => property_value_from_value(v).map(Property::new),
            })
            .collect::<CoreResult<Vec<_>>>()?;
        pm.set_multi(name, props);
    }
    Ok(pm)
}

/// Canonical bytes of a property map.
///
/// # Errors
///
/// Fails if a float property holds NaN.
pub fn encode_property_map(pm: &PropertyMap) -> CoreResult<Vec<u8>> {
    Ok(to_canonical_cbor(&property_map_to_value(pm))?)
}

/// Property map from canonical bytes.
///
/// # Errors
///
/// Fails on malformed or non-canonical input.
pub fn decode_property_map(bytes: &[u8]) -> CoreResult<PropertyMap> {
    property_map_from_value(&from_cbor(bytes)?)
}

/// Canonical bytes of a key.
///
/// # Errors
///
/// Key encodings contain no floats, so this only fails on internal bugs.
pub fn encode_key(key: &Key) -> CoreResult<Vec<u8>> {
    Ok(to_canonical_cbor(&key_to_value(key))?)
}

/// Key from canonical bytes.
///
/// # Errors
///
/// Fails on malformed or non-canonical input.
pub fn decode_key(bytes: &[u8]) -> CoreResult<Key> {
    key_from_value(&from_cbor(bytes)?)
}
