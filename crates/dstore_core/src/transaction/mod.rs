//! Transactions: the context set and the retrying coordinator.
//!
//! A transaction attempt works on a [`ContextSnapshot`] taken from every
//! component of a [`ContextSet`]. When the body succeeds the coordinator
//! locks the whole set, asks every component whether the snapshot can still
//! be applied, and either applies it or retries with a fresh snapshot.

mod context;
mod coordinator;
mod state;

pub use context::{ComponentSnapshot, ContextSet, ContextSnapshot, LockedComponent, LockedSet, TxnComponent};
pub use coordinator::Coordinator;
pub use state::{TransactionOptions, TransactionState};
