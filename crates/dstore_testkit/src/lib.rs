//! # dstore testkit
//!
//! Test utilities for dstore.
//!
//! This crate provides:
//! - Fixtures for plain and cached in-memory datastores
//! - Property-based test generators using proptest
//! - A model harness that checks a datastore against a plain map
//! - Concurrency stress helpers
//!
//! ## Usage
//!
//! ```
//! use dstore_testkit::prelude::*;
//!
//! with_store(|store| {
//!     let key = store.context().new_key("Obj", 1, None);
//!     put_value(&store.ds, &key, 3);
//!     assert_eq!(read_value(&store.ds, &key), Some(3));
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
