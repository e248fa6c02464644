//! # dstore codec
//!
//! Canonical CBOR encoding and decoding for dstore.
//!
//! Every persisted entity, every cached entity payload and every key
//! fingerprint goes through this crate, so the same logical value always has
//! exactly one byte representation:
//!
//! - map keys sorted length-first, then bytewise
//! - shortest integer and length arguments
//! - floats always as 64-bit doubles, NaN forbidden
//! - no indefinite-length items
//! - strings must be UTF-8
//!
//! ```
//! use dstore_codec::{from_cbor, to_canonical_cbor, Value};
//!
//! let value = Value::Array(vec![Value::Integer(42), Value::Float(0.5)]);
//! let bytes = to_canonical_cbor(&value).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod value;

pub use decoder::{from_cbor, CanonicalDecoder};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use value::Value;

/// Types with a canonical CBOR form.
pub trait Encode {
    /// Encode this value to canonical CBOR bytes.
    ///
    /// # Errors
    ///
    /// Fails if the value has no canonical form.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Types that can be rebuilt from canonical CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Fails on malformed or non-canonical input.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            any::<f64>()
                .prop_filter("NaN has no encoding", |f| !f.is_nan())
                .prop_map(Value::Float),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
            "[a-z]{0,8}".prop_map(Value::Text),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                proptest::collection::btree_map("[a-z]{1,4}", inner.clone(), 0..4).prop_map(
                    |m| Value::map(m.into_iter().map(|(k, v)| (Value::Text(k), v)).collect())
                ),
                (0u64..50_000, inner).prop_map(|(t, v)| Value::tag(t, v)),
            ]
        })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(value in arb_value()) {
            let bytes = value.encode().unwrap();
            prop_assert_eq!(Value::decode(&bytes).unwrap(), value);
        }

        #[test]
        fn encoding_is_deterministic(value in arb_value()) {
            let first = to_canonical_cbor(&value).unwrap();
            let again = to_canonical_cbor(&from_cbor(&first).unwrap()).unwrap();
            prop_assert_eq!(first, again);
        }
    }

    #[test]
    fn negative_zero_survives() {
        let bytes = to_canonical_cbor(&Value::Float(-0.0)).unwrap();
        let back = from_cbor(&bytes).unwrap().as_float().unwrap();
        assert!(back == 0.0 && back.is_sign_negative());
    }
}
