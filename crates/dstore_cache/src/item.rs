//! Cache items and their wire form.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! flags: u32 | expiration_ms: u64 (0 = never) | len: u32 | payload
//! ```

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CacheError, CacheResult};

const HEADER_LEN: usize = 4 + 8 + 4;

/// What a cache slot currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemFlags {
    /// Not written by this layer.
    #[default]
    Unknown,
    /// An encoded entity, or an empty payload for a known-missing entity.
    HasData,
    /// A lock; the payload is the owner's nonce (empty for write locks).
    HasLock,
}

impl ItemFlags {
    /// Wire value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        match self {
            ItemFlags::Unknown => 0,
            ItemFlags::HasData => 1,
            ItemFlags::HasLock => 2,
        }
    }

    /// Parses a wire value; unrecognised values map to `Unknown`.
    #[must_use]
    pub const fn from_u32(raw: u32) -> Self {
        match raw {
            1 => ItemFlags::HasData,
            2 => ItemFlags::HasLock,
            _ => ItemFlags::Unknown,
        }
    }
}

/// One cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheItem {
    key: String,
    value: Bytes,
    flags: ItemFlags,
    expiration: Option<Duration>,
    cas: u64,
}

impl CacheItem {
    /// An empty item for `key`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// A lock item carrying `nonce`.
    #[must_use]
    pub fn lock(key: impl Into<String>, nonce: impl Into<Bytes>, ttl: Option<Duration>) -> Self {
        Self::new(key)
            .with_flags(ItemFlags::HasLock)
            .with_value(nonce)
            .with_expiration(ttl)
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = value.into();
        self
    }

    /// Sets the flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: ItemFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the lifetime; `None` never expires.
    #[must_use]
    pub const fn with_expiration(mut self, expiration: Option<Duration>) -> Self {
        self.expiration = expiration;
        self
    }

    /// Sets the compare-and-swap token.
    #[must_use]
    pub const fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    /// Slot key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Payload.
    #[must_use]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Flags.
    #[must_use]
    pub fn flags(&self) -> ItemFlags {
        self.flags
    }

    /// Lifetime, `None` for never.
    #[must_use]
    pub fn expiration(&self) -> Option<Duration> {
        self.expiration
    }

    /// Compare-and-swap token handed out by the last read, 0 if none.
    #[must_use]
    pub fn cas(&self) -> u64 {
        self.cas
    }

    /// Wire form of flags, expiration and payload. The key and CAS token are
    /// slot metadata and are not part of it.
    ///
    /// # Errors
    ///
    /// Fails if the payload is longer than `u32::MAX` bytes.
    pub fn encode(&self) -> CacheResult<Bytes> {
        let len = u32::try_from(self.value.len())
            .map_err(|_| CacheError::encoding("cache payload longer than u32::MAX"))?;
        let expiration_ms = self
            .expiration
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.value.len());
        buf.put_u32(self.flags.as_u32());
        buf.put_u64(expiration_ms);
        buf.put_u32(len);
        buf.put_slice(&self.value);
        Ok(buf.freeze())
    }

    /// Rebuilds an item for `key` from its wire form.
    ///
    /// # Errors
    ///
    /// Fails on truncated input or trailing bytes.
    pub fn decode(key: impl Into<String>, mut data: Bytes) -> CacheResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(CacheError::encoding(format!(
                "cache item header needs {HEADER_LEN} bytes, got {}",
                data.len()
            )));
        }
        let flags = ItemFlags::from_u32(data.get_u32());
        let expiration_ms = data.get_u64();
        let len = data.get_u32() as usize;
        if data.len() != len {
            return Err(CacheError::encoding(format!(
                "cache item payload is {} bytes, header says {len}",
                data.len()
            )));
        }
        Ok(Self {
            key: key.into(),
            value: data,
            flags,
            expiration: (expiration_ms != 0).then(|| Duration::from_millis(expiration_ms)),
            cas: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lock_item_shape() {
        let item = CacheItem::lock("k", vec![1u8, 2, 3], None);
        assert_eq!(item.flags(), ItemFlags::HasLock);
        assert_eq!(item.value().as_ref(), &[1, 2, 3]);
        assert_eq!(item.expiration(), None);
    }

    #[test]
    fn wire_layout() {
        let item = CacheItem::new("k")
            .with_flags(ItemFlags::HasData)
            .with_expiration(Some(Duration::from_secs(2)))
            .with_value(vec![0xAAu8]);
        let bytes = item.encode().unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0x07, 0xD0, 0, 0, 0, 1, 0xAA]
        );
    }

    #[test]
    fn decode_rejects_bad_lengths() {
        assert!(CacheItem::decode("k", Bytes::from_static(&[0, 0, 0])).is_err());
        let mut bytes = BytesMut::new();
        bytes.put_u32(1);
        bytes.put_u64(0);
        bytes.put_u32(5);
        bytes.put_slice(&[1, 2]);
        assert!(CacheItem::decode("k", bytes.freeze()).is_err());
    }

    #[test]
    fn unknown_flags_survive_as_unknown() {
        assert_eq!(ItemFlags::from_u32(99), ItemFlags::Unknown);
        assert_eq!(ItemFlags::from_u32(ItemFlags::HasLock.as_u32()), ItemFlags::HasLock);
    }

    proptest! {
        #[test]
        fn encode_decode(
            flags in 0u32..3,
            expiration_ms in proptest::option::of(1u64..10_000_000),
            payload in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let item = CacheItem::new("slot")
                .with_flags(ItemFlags::from_u32(flags))
                .with_expiration(expiration_ms.map(Duration::from_millis))
                .with_value(payload);
            let decoded = CacheItem::decode("slot", item.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, item);
        }
    }
}
