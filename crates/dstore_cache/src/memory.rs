//! In-process cache backend.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::backend::CacheBackend;
use crate::error::CacheResult;
use crate::item::CacheItem;

struct Slot {
    encoded: Bytes,
    cas: u64,
    expires_at: Option<Instant>,
}

impl Slot {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Counters kept by [`MemoryCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Reads that found a live item.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Successful adds.
    pub adds: u64,
    /// Successful compare-and-swaps.
    pub cas_ok: u64,
    /// Compare-and-swaps that lost a race.
    pub cas_failed: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    adds: AtomicU64,
    cas_ok: AtomicU64,
    cas_failed: AtomicU64,
}

/// A thread-safe cache held in memory.
///
/// Items are stored in their wire form and expire lazily.
pub struct MemoryCache {
    slots: RwLock<HashMap<String, Slot>>,
    next_cas: AtomicU64,
    counters: Counters,
}

impl MemoryCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            next_cas: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            adds: c.adds.load(Ordering::Relaxed),
            cas_ok: c.cas_ok.load(Ordering::Relaxed),
            cas_failed: c.cas_failed.load(Ordering::Relaxed),
        }
    }

    /// Reads a slot without touching the counters.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<CacheItem> {
        let slots = self.slots.read();
        let slot = slots.get(key).filter(|s| s.live(Instant::now()))?;
        CacheItem::decode(key, slot.encoded.clone())
            .ok()
            .map(|item| item.with_cas(slot.cas))
    }

    /// Number of live slots.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.read().values().filter(|s| s.live(now)).count()
    }

    /// True if no slot is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every slot.
    pub fn flush(&self) {
        self.slots.write().clear();
    }

    fn slot_for(&self, item: &CacheItem, now: Instant) -> CacheResult<Slot> {
        Ok(Slot {
            encoded: item.encode()?,
            cas: self.next_cas.fetch_add(1, Ordering::Relaxed),
            expires_at: item.expiration().map(|ttl| now + ttl),
        })
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("slots", &self.slots.read().len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl CacheBackend for MemoryCache {
    fn add_multi(&self, items: &[CacheItem]) -> CacheResult<Vec<bool>> {
        let now = Instant::now();
        let mut slots = self.slots.write();
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if slots.get(item.key()).is_some_and(|s| s.live(now)) {
                out.push(false);
                continue;
            }
            slots.insert(item.key().to_string(), self.slot_for(item, now)?);
            self.counters.adds.fetch_add(1, Ordering::Relaxed);
            out.push(true);
        }
        Ok(out)
    }

    fn get_multi(&self, keys: &[String]) -> CacheResult<Vec<Option<CacheItem>>> {
        let now = Instant::now();
        let slots = self.slots.read();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            match slots.get(key).filter(|s| s.live(now)) {
                Some(slot) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    let item = CacheItem::decode(key.as_str(), slot.encoded.clone())?;
                    out.push(Some(item.with_cas(slot.cas)));
                }
                None => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    out.push(None);
                }
            }
        }
        Ok(out)
    }

    fn set_multi(&self, items: &[CacheItem]) -> CacheResult<()> {
        let now = Instant::now();
        let mut slots = self.slots.write();
        for item in items {
            slots.insert(item.key().to_string(), self.slot_for(item, now)?);
        }
        Ok(())
    }

    fn compare_and_swap_multi(&self, items: &[CacheItem]) -> CacheResult<Vec<bool>> {
        let now = Instant::now();
        let mut slots = self.slots.write();
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let current = slots
                .get(item.key())
                .filter(|s| s.live(now))
                .map(|s| s.cas);
            if current.is_some() && current == Some(item.cas()) {
                slots.insert(item.key().to_string(), self.slot_for(item, now)?);
                self.counters.cas_ok.fetch_add(1, Ordering::Relaxed);
                out.push(true);
            } else {
                self.counters.cas_failed.fetch_add(1, Ordering::Relaxed);
                out.push(false);
            }
        }
        Ok(out)
    }

    fn delete_multi(&self, keys: &[String]) -> CacheResult<()> {
        let mut slots = self.slots.write();
        for key in keys {
            slots.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemFlags;
    use std::time::Duration;

    fn data(key: &str, payload: &'static [u8]) -> CacheItem {
        CacheItem::new(key)
            .with_flags(ItemFlags::HasData)
            .with_value(payload)
    }

    #[test]
    fn add_only_fills_empty_slots() {
        let cache = MemoryCache::new();
        assert_eq!(cache.add_multi(&[data("a", b"1")]).unwrap(), vec![true]);
        assert_eq!(
            cache.add_multi(&[data("a", b"2"), data("b", b"3")]).unwrap(),
            vec![false, true]
        );
        assert_eq!(cache.peek("a").unwrap().value().as_ref(), b"1");
        assert_eq!(cache.stats().adds, 2);
    }

    #[test]
    fn cas_needs_the_current_token() {
        let cache = MemoryCache::new();
        cache.set_multi(&[data("a", b"1")]).unwrap();
        let read = cache.get_multi(&["a".to_string()]).unwrap()[0]
            .clone()
            .unwrap();

        let stale = data("a", b"stale").with_cas(read.cas() + 100);
        let fresh = data("a", b"fresh").with_cas(read.cas());
        assert_eq!(cache.compare_and_swap_multi(&[stale]).unwrap(), vec![false]);
        assert_eq!(cache.compare_and_swap_multi(&[fresh.clone()]).unwrap(), vec![true]);
        // The token changed with the swap.
        assert_eq!(cache.compare_and_swap_multi(&[fresh]).unwrap(), vec![false]);
        assert_eq!(cache.peek("a").unwrap().value().as_ref(), b"fresh");

        let stats = cache.stats();
        assert_eq!((stats.cas_ok, stats.cas_failed), (1, 2));
    }

    #[test]
    fn cas_on_missing_slot_fails() {
        let cache = MemoryCache::new();
        assert_eq!(
            cache.compare_and_swap_multi(&[data("a", b"1")]).unwrap(),
            vec![false]
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn expired_items_disappear() {
        let cache = MemoryCache::new();
        cache
            .set_multi(&[data("a", b"1").with_expiration(Some(Duration::from_millis(1)))])
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get_multi(&["a".to_string()]).unwrap(), vec![None]);
        assert_eq!(cache.stats().misses, 1);
        // An expired slot counts as empty for add.
        assert_eq!(cache.add_multi(&[data("a", b"2")]).unwrap(), vec![true]);
    }

    #[test]
    fn delete_and_flush() {
        let cache = MemoryCache::new();
        cache.set_multi(&[data("a", b"1"), data("b", b"2")]).unwrap();
        cache.delete_multi(&["a".to_string(), "zzz".to_string()]).unwrap();
        assert_eq!(cache.len(), 1);
        cache.flush();
        assert!(cache.is_empty());
    }
}
