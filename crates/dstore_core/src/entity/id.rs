//! Integer id allocation for incomplete keys.

use std::collections::HashMap;

use crate::key::{Key, KeyId};

/// Hands out integer ids per `(namespace, parent, kind)`.
///
/// Ids only move forward, so an id given to an attempt that later conflicts
/// or fails is never handed out again.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: HashMap<(String, Option<Key>, String), i64>,
}

impl IdAllocator {
    /// Creates an empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Completes `incomplete` with the next id for which `taken` is false.
    pub fn allocate(&mut self, incomplete: &Key, taken: impl Fn(&Key) -> bool) -> Key {
        let counter = self
            .next
            .entry((
                incomplete.namespace().to_string(),
                incomplete.parent().cloned(),
                incomplete.kind().to_string(),
            ))
            .or_insert(0);
        loop {
            *counter += 1;
            let key = incomplete.with_id(KeyId::Int(*counter));
            if !taken(&key) {
                return key;
            }
        }
    }
}
