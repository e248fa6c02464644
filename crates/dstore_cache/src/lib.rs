//! # dstore cache
//!
//! A read-through cache layer for any [`RawDatastore`](dstore_core::RawDatastore).
//!
//! [`CachedDatastore`] keeps entities in a [`CacheBackend`] such as
//! [`MemoryCache`]. Each key maps to one or more cache slots ("shards");
//! a read picks one at random, a write locks and clears all of them.
//!
//! Consistency relies on two kinds of lock items:
//!
//! - a reader that misses adds a short-lived lock holding a random nonce and
//!   may only write the fetched entity back if the slot still holds that lock
//! - a writer overwrites every slot of the keys it writes with a lock and
//!   deletes them once the write is done
//!
//! Inside a transaction nothing is read from the cache. Written keys are
//! recorded in a [`TxnLedger`]; their slots are locked when the attempt
//! commits and cleared after the transaction returns.
//!
//! ```
//! use std::sync::Arc;
//!
//! use dstore_cache::{CacheConfig, CachedDatastore, MemoryCache};
//! use dstore_core::{Datastore, MemoryDatastore, PropertyMap};
//!
//! let cache = Arc::new(MemoryCache::new());
//! let cached = CachedDatastore::new(MemoryDatastore::new(), cache.clone(), CacheConfig::default());
//! let ds = Datastore::new(&cached);
//!
//! let key = ds.key_context().new_key("Obj", 1, None);
//! let mut pm = PropertyMap::new();
//! pm.set_meta("key", key.clone());
//! pm.set("Value", 7);
//! ds.put(&mut pm).unwrap();
//!
//! let loaded = ds.get(&key).unwrap();
//! assert_eq!(loaded.first("Value"), pm.first("Value"));
//! assert_eq!(cache.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod dscache;
mod error;
mod item;
mod ledger;
mod memory;
mod payload;
mod plan;
mod support;

pub use backend::CacheBackend;
pub use config::{CacheConfig, MAX_SHARDS};
pub use dscache::CachedDatastore;
pub use error::{CacheError, CacheResult};
pub use item::{CacheItem, ItemFlags};
pub use ledger::{TxnCachedDatastore, TxnLedger};
pub use memory::{CacheStats, MemoryCache};
pub use payload::{decode_entity, encode_entity, CachedEntity, PAYLOAD_VERSION};
pub use support::{fingerprint, CacheContext, KEY_PREFIX};
