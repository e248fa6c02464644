//! Entity storage: the versioned entity map and id allocation.

mod id;
mod store;

pub use id::IdAllocator;
pub use store::{QueryRows, StoreState};
