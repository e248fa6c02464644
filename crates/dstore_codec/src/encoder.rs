//! Canonical CBOR encoder.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Encode a value to canonical CBOR bytes.
///
/// Map keys are sorted length-first then bytewise, integers and lengths use
/// the shortest form, floats are always 64-bit doubles, and nothing is
/// indefinite-length.
///
/// # Errors
///
/// Returns [`CodecError::NaNForbidden`] if the value contains a NaN.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// A canonical CBOR encoder.
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode a value, appending to the buffer.
    ///
    /// # Errors
    ///
    /// Fails if the value contains a NaN float; the buffer is left untouched.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        if value.contains_nan() {
            return Err(CodecError::NaNForbidden);
        }
        self.write(value);
        Ok(())
    }

    /// Encoded form of `value` without NaN validation, used for ordering.
    pub(crate) fn raw_bytes(value: &Value) -> Vec<u8> {
        let mut encoder = Self::new();
        encoder.write(value);
        encoder.buffer
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    fn write(&mut self, value: &Value) {
        match value {
            Value::Null => self.buffer.push(0xf6),
            Value::Bool(b) => self.buffer.push(if *b { 0xf5 } else { 0xf4 }),
            Value::Integer(n) => self.write_integer(*n),
            Value::Float(f) => {
                self.buffer.push(0xfb);
                self.buffer.extend_from_slice(&f.to_bits().to_be_bytes());
            }
            Value::Bytes(b) => {
                self.write_head(2, b.len() as u64);
                self.buffer.extend_from_slice(b);
            }
            Value::Text(s) => {
                self.write_head(3, s.len() as u64);
                self.buffer.extend_from_slice(s.as_bytes());
            }
            Value::Array(items) => {
                self.write_head(4, items.len() as u64);
                for item in items {
                    self.write(item);
                }
            }
            Value::Map(pairs) => self.write_map(pairs),
            Value::Tag(tag, inner) => {
                self.write_head(6, *tag);
                self.write(inner);
            }
        }
    }

    #[allow(clippy::cast_sign_loss)]
    fn write_integer(&mut self, n: i64) {
        if n >= 0 {
            self.write_head(0, n as u64);
        } else {
            // major type 1 carries -1 - n, which is non-negative for every negative i64
            self.write_head(1, (-1 - n) as u64);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_head(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;
        if value < 24 {
            self.buffer.push(mt | value as u8);
        } else if let Ok(v) = u8::try_from(value) {
            self.buffer.push(mt | 24);
            self.buffer.push(v);
        } else if let Ok(v) = u16::try_from(value) {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&v.to_be_bytes());
        } else if let Ok(v) = u32::try_from(value) {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&v.to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn write_map(&mut self, pairs: &[(Value, Value)]) {
        let mut encoded: Vec<(Vec<u8>, &Value)> = pairs
            .iter()
            .map(|(k, v)| (Self::raw_bytes(k), v))
            .collect();
        encoded.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(&b.0)));

        self.write_head(5, pairs.len() as u64);
        for (key, value) in encoded {
            self.buffer.extend_from_slice(&key);
            self.write(value);
        }
    }
}

impl Default for CanonicalEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(value: &Value) -> Vec<u8> {
        to_canonical_cbor(value).unwrap()
    }

    #[test]
    fn simple_values() {
        assert_eq!(enc(&Value::Null), vec![0xf6]);
        assert_eq!(enc(&Value::Bool(false)), vec![0xf4]);
        assert_eq!(enc(&Value::Bool(true)), vec![0xf5]);
    }

    #[test]
    fn integers_use_shortest_form() {
        assert_eq!(enc(&Value::Integer(0)), vec![0x00]);
        assert_eq!(enc(&Value::Integer(23)), vec![0x17]);
        assert_eq!(enc(&Value::Integer(24)), vec![0x18, 24]);
        assert_eq!(enc(&Value::Integer(256)), vec![0x19, 0x01, 0x00]);
        assert_eq!(
            enc(&Value::Integer(65536)),
            vec![0x1a, 0x00, 0x01, 0x00, 0x00]
        );
        assert_eq!(enc(&Value::Integer(-1)), vec![0x20]);
        assert_eq!(enc(&Value::Integer(-25)), vec![0x38, 24]);
    }

    #[test]
    fn extreme_integers() {
        let max = enc(&Value::Integer(i64::MAX));
        assert_eq!(max[0], 0x1b);
        let min = enc(&Value::Integer(i64::MIN));
        assert_eq!(min[0], 0x3b);
        assert_eq!(&min[1..], &(i64::MAX as u64).to_be_bytes());
    }

    #[test]
    fn floats_are_always_doubles() {
        let bytes = enc(&Value::Float(1.5));
        assert_eq!(bytes.len(), 9);
        assert_eq!(bytes[0], 0xfb);
        assert_eq!(&bytes[1..], &1.5f64.to_bits().to_be_bytes());
    }

    #[test]
    fn nan_is_rejected() {
        let err = to_canonical_cbor(&Value::Array(vec![Value::Float(f64::NAN)])).unwrap_err();
        assert_eq!(err, CodecError::NaNForbidden);
    }

    #[test]
    fn text_and_bytes() {
        assert_eq!(enc(&Value::Text("a".into())), vec![0x61, b'a']);
        assert_eq!(enc(&Value::Bytes(vec![1, 2])), vec![0x42, 1, 2]);
    }

    #[test]
    fn tags() {
        assert_eq!(enc(&Value::tag(1, Value::Integer(0))), vec![0xc1, 0x00]);
        let bytes = enc(&Value::tag(40_000, Value::Null));
        assert_eq!(bytes, vec![0xd9, 0x9c, 0x40, 0xf6]);
    }

    #[test]
    fn map_is_sorted_regardless_of_input_order() {
        let a = Value::Map(vec![
            (Value::Text("b".into()), Value::Integer(2)),
            (Value::Text("a".into()), Value::Integer(1)),
        ]);
        let b = Value::Map(vec![
            (Value::Text("a".into()), Value::Integer(1)),
            (Value::Text("b".into()), Value::Integer(2)),
        ]);
        assert_eq!(enc(&a), enc(&b));
        assert_eq!(enc(&a), vec![0xa2, 0x61, b'a', 0x01, 0x61, b'b', 0x02]);
    }

    #[test]
    fn output_matches_ciborium() {
        let value = Value::map(vec![
            (Value::Text("n".into()), Value::Integer(-300)),
            (Value::Text("f".into()), Value::Float(0.25)),
            (
                Value::Text("list".into()),
                Value::Array(vec![Value::Bool(true), Value::Bytes(vec![9])]),
            ),
        ]);
        let bytes = enc(&value);
        let parsed: ciborium::value::Value = ciborium::de::from_reader(bytes.as_slice()).unwrap();
        let map = parsed.as_map().unwrap();
        assert_eq!(map.len(), 3);
        let n = map
            .iter()
            .find(|(k, _)| k.as_text() == Some("n"))
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(n, ciborium::value::Value::Integer((-300i64).into()));
    }
}
