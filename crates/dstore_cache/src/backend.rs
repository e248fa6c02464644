//! The cache contract the coordinator talks to.

use crate::error::CacheResult;
use crate::item::CacheItem;

/// A memcache-style key/value cache.
///
/// Every batch call answers in request order. An `Err` means the cache could
/// not be used at all; callers treat it like a miss.
pub trait CacheBackend: Send + Sync {
    /// Stores items whose slot is empty. Returns, per item, whether it was
    /// stored.
    ///
    /// # Errors
    ///
    /// The cache is unavailable.
    fn add_multi(&self, items: &[CacheItem]) -> CacheResult<Vec<bool>>;

    /// Reads slots. Found items carry the CAS token of the read.
    ///
    /// # Errors
    ///
    /// The cache is unavailable.
    fn get_multi(&self, keys: &[String]) -> CacheResult<Vec<Option<CacheItem>>>;

    /// Stores items unconditionally.
    ///
    /// # Errors
    ///
    /// The cache is unavailable.
    fn set_multi(&self, items: &[CacheItem]) -> CacheResult<()>;

    /// Stores each item only if its slot still has the item's CAS token.
    /// Returns, per item, whether the swap happened.
    ///
    /// # Errors
    ///
    /// The cache is unavailable.
    fn compare_and_swap_multi(&self, items: &[CacheItem]) -> CacheResult<Vec<bool>>;

    /// Clears slots. Missing slots are not an error.
    ///
    /// # Errors
    ///
    /// The cache is unavailable.
    fn delete_multi(&self, keys: &[String]) -> CacheResult<()>;
}
