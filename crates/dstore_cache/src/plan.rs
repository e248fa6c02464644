//! Splits a batch read into cache hits and backend fetches.

use dstore_core::{CoreError, CoreResult, Key, PropertyMap};

use crate::item::{CacheItem, ItemFlags};
use crate::payload::{decode_entity, CachedEntity};

/// Outcome of comparing the cache's answers with the requested keys.
#[derive(Debug, Default)]
pub(crate) struct FetchPlan {
    /// Keys that must be read from the backend.
    pub(crate) to_get: Vec<Key>,
    /// Index into the request of each entry of `to_get`.
    pub(crate) idx_map: Vec<usize>,
    /// Slot to write back for each entry of `to_get`, when this reader owns it.
    pub(crate) to_save: Vec<Option<CacheItem>>,
    /// Result per requested key; `None` until fetched.
    pub(crate) decoded: Vec<Option<CoreResult<PropertyMap>>>,
}

impl FetchPlan {
    /// Builds the plan.
    ///
    /// `slots[i]` is the slot read for `keys[i]` (`None` when the key is not
    /// cached) and `items[i]` what the cache returned for it.
    pub(crate) fn new(
        keys: &[Key],
        slots: &[Option<String>],
        items: Vec<Option<CacheItem>>,
        nonce: &[u8],
    ) -> Self {
        let mut plan = FetchPlan {
            decoded: vec![None; keys.len()],
            ..FetchPlan::default()
        };
        for (i, ((key, slot), item)) in keys.iter().zip(slots).zip(items).enumerate() {
            let Some(slot) = slot else {
                plan.fetch(i, key, None);
                continue;
            };
            let Some(item) = item else {
                plan.fetch(i, key, None);
                continue;
            };
            match item.flags() {
                ItemFlags::HasLock if &item.value()[..] == nonce => {
                    plan.fetch(i, key, Some(CacheItem::new(slot.as_str()).with_cas(item.cas())));
                }
                ItemFlags::HasData => match decode_entity(item.value()) {
                    Ok(CachedEntity::Missing) => plan.decoded[i] = Some(Err(CoreError::NoSuchEntity)),
                    Ok(CachedEntity::Found(pm)) => plan.decoded[i] = Some(Ok(pm)),
                    Err(_) => {
                        plan.fetch(i, key, Some(CacheItem::new(slot.as_str()).with_cas(item.cas())));
                    }
                },
                ItemFlags::HasLock | ItemFlags::Unknown => plan.fetch(i, key, None),
            }
        }
        plan
    }

    fn fetch(&mut self, i: usize, key: &Key, save: Option<CacheItem>) {
        self.to_get.push(key.clone());
        self.idx_map.push(i);
        self.to_save.push(save);
    }

    /// True if every key was served from the cache.
    pub(crate) fn is_empty(&self) -> bool {
        self.to_get.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::encode_entity;
    use dstore_core::KeyContext;

    fn keys(n: i64) -> Vec<Key> {
        let ctx = KeyContext::new("dev~app", "");
        (1..=n).map(|i| ctx.new_key("Obj", i, None)).collect()
    }

    fn slots(n: usize) -> Vec<Option<String>> {
        (0..n).map(|i| Some(format!("slot{i}"))).collect()
    }

    #[test]
    fn classifies_every_case() {
        let keys = keys(6);
        let mut slots = slots(6);
        slots[5] = None;
        let mut pm = PropertyMap::new();
        pm.set("Value", 1);

        let items = vec![
            // Our own lock: fetch and save.
            Some(CacheItem::lock("slot0", b"me".to_vec(), None).with_cas(7)),
            // Someone else's lock: fetch only.
            Some(CacheItem::lock("slot1", b"other".to_vec(), None).with_cas(8)),
            // Cached entity.
            Some(
                CacheItem::new("slot2")
                    .with_flags(ItemFlags::HasData)
                    .with_value(encode_entity(&pm).unwrap()),
            ),
            // Cached absence.
            Some(CacheItem::new("slot3").with_flags(ItemFlags::HasData)),
            // Nothing came back.
            None,
            // Not cached at all.
            None,
        ];
        let plan = FetchPlan::new(&keys, &slots, items, b"me");

        assert_eq!(plan.idx_map, vec![0, 1, 4, 5]);
        assert_eq!(plan.to_get, vec![keys[0].clone(), keys[1].clone(), keys[4].clone(), keys[5].clone()]);
        assert_eq!(plan.to_save[0].as_ref().map(CacheItem::cas), Some(7));
        assert_eq!(plan.to_save[0].as_ref().map(CacheItem::key), Some("slot0"));
        assert!(plan.to_save[1..].iter().all(Option::is_none));
        assert_eq!(plan.decoded[2], Some(Ok(pm)));
        assert_eq!(plan.decoded[3], Some(Err(CoreError::NoSuchEntity)));
        assert!(!plan.is_empty());
    }

    #[test]
    fn undecodable_data_is_refetched_and_overwritten() {
        let keys = keys(1);
        let items = vec![Some(
            CacheItem::new("slot0")
                .with_flags(ItemFlags::HasData)
                .with_value(vec![99u8, 1, 2])
                .with_cas(3),
        )];
        let plan = FetchPlan::new(&keys, &slots(1), items, b"me");
        assert_eq!(plan.idx_map, vec![0]);
        assert_eq!(plan.to_save[0].as_ref().map(CacheItem::cas), Some(3));
    }

    #[test]
    fn all_hits_leave_nothing_to_fetch() {
        let keys = keys(1);
        let items = vec![Some(CacheItem::new("slot0").with_flags(ItemFlags::HasData))];
        let plan = FetchPlan::new(&keys, &slots(1), items, b"me");
        assert!(plan.is_empty());
    }
}
