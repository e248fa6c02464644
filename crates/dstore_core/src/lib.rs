//! # dstore core
//!
//! An in-memory, transactional emulation of a hierarchical entity datastore.
//!
//! The crate provides:
//!
//! - [`Key`] and [`PropertyMap`], the identity and data model
//! - [`RawDatastore`], the backend contract with per-item batch results
//! - [`MemoryDatastore`], the in-process engine with secondary indexes,
//!   entity-group transactions and push task queues
//! - [`Datastore`], a thin typed facade over any [`RawDatastore`]
//!
//! Transactions are optimistic. Each attempt works on a snapshot; at commit
//! every component of the context set is locked in a fixed order and the
//! attempt is applied only if no entity group it touched changed meanwhile.
//!
//! ```
//! use dstore_core::{Datastore, MemoryDatastore, PropertyMap, TransactionOptions};
//!
//! let mem = MemoryDatastore::new();
//! let ds = Datastore::new(&mem);
//! let key = ds.key_context().new_key("Counter", 1, None);
//!
//! ds.run_in_transaction(
//!     |txn| {
//!         let mut pm = PropertyMap::new();
//!         pm.set_meta("key", key.clone());
//!         pm.set("Value", 1);
//!         txn.put(&mut pm)?;
//!         Ok(())
//!     },
//!     &TransactionOptions::new(),
//! )
//! .unwrap();
//! assert_eq!(mem.entity_count(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod datastore;
mod error;
mod key;
mod memory;
mod property;
mod query;
mod taskqueue;
mod types;

pub mod entity;
pub mod index;
pub mod serialize;
pub mod transaction;

pub use backend::{
    CommitHook, DeleteMultiCb, GetMultiCb, PutMultiCb, RawDatastore, RunCb, TxnFn,
};
pub use config::Config;
pub use datastore::Datastore;
pub use error::{CoreError, CoreResult, MultiError};
pub use index::{Direction, IndexColumn, IndexDefinition};
pub use key::{Key, KeyContext, KeyId};
pub use memory::MemoryDatastore;
pub use property::{is_meta, Property, PropertyMap, PropertyValue, META_PREFIX};
pub use query::{Filter, FilterOp, Order, Query, QueryPlan, ValueRange};
pub use taskqueue::{RawTaskQueue, Task, DEFAULT_QUEUE};
pub use transaction::{TransactionOptions, TransactionState};
pub use types::TransactionId;
