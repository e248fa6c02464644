//! Entity payloads stored in data items.
//!
//! A payload is one format-version byte followed by the canonical CBOR form
//! of the property map. The empty payload records that the entity does not
//! exist.

use dstore_codec::{from_cbor, to_canonical_cbor};
use dstore_core::serialize::{property_map_from_value, property_map_to_value};
use dstore_core::PropertyMap;

use crate::error::{CacheError, CacheResult};

/// Version byte of the current payload format.
pub const PAYLOAD_VERSION: u8 = 1;

/// What a data item says about its entity.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedEntity {
    /// The entity is known not to exist.
    Missing,
    /// The entity's properties.
    Found(PropertyMap),
}

/// Encodes `pm` as a versioned payload.
///
/// # Errors
///
/// Fails if a float property holds NaN.
pub fn encode_entity(pm: &PropertyMap) -> CacheResult<Vec<u8>> {
    let body = to_canonical_cbor(&property_map_to_value(pm))?;
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(PAYLOAD_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes a payload written by [`encode_entity`], or the empty payload.
///
/// # Errors
///
/// Fails on another format version or malformed CBOR.
pub fn decode_entity(payload: &[u8]) -> CacheResult<CachedEntity> {
    let Some((&version, body)) = payload.split_first() else {
        return Ok(CachedEntity::Missing);
    };
    if version != PAYLOAD_VERSION {
        return Err(CacheError::encoding(format!(
            "payload version {version}, expected {PAYLOAD_VERSION}"
        )));
    }
    let value = from_cbor(body)?;
    property_map_from_value(&value)
        .map(CachedEntity::Found)
        .map_err(|e| CacheError::encoding(e.to_string()))
}
