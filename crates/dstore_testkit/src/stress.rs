//! Concurrency stress helpers.
//!
//! These run many threads against one datastore and report how the
//! transactions went.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use dstore_core::{CoreError, Key, PropertyValue, RawDatastore, TransactionOptions};

use crate::fixtures::value_map;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Transaction attempts, including retried ones.
    pub attempts: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, attempts: usize, duration: Duration) -> Self {
        Self {
            total_ops: successful + failed,
            successful_ops: successful,
            failed_ops: failed,
            attempts,
            duration,
        }
    }

    /// Attempts that conflicted and were retried.
    pub fn retries(&self) -> usize {
        self.attempts.saturating_sub(self.total_ops)
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Operations each thread performs.
    pub ops_per_thread: usize,
    /// Options every transaction runs with.
    pub options: TransactionOptions,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            ops_per_thread: 10,
            options: TransactionOptions::new().retry_forever(),
        }
    }
}

/// Increments the `Value` of `key` once per operation, each increment in
/// its own transaction. A missing entity counts as zero.
pub fn stress_increments(ds: &dyn RawDatastore, key: &Key, config: &StressConfig) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let attempts = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for _ in 0..config.threads {
            scope.spawn(|| {
                for _ in 0..config.ops_per_thread {
                    let result = ds.run_in_transaction(
                        &mut |txn| {
                            attempts.fetch_add(1, Ordering::Relaxed);
                            let current = match txn
                                .get_multi_collect(std::slice::from_ref(key))?
                                .pop()
                            {
                                Some(Ok(pm)) => pm.first("Value").and_then(PropertyValue::as_int),
                                Some(Err(CoreError::NoSuchEntity)) | None => None,
                                Some(Err(err)) => return Err(err),
                            };
                            let next = value_map(current.unwrap_or(0) + 1);
                            txn.put_multi_collect(std::slice::from_ref(key), &[next])?;
                            Ok(())
                        },
                        &config.options,
                    );
                    match result {
                        Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    StressTestResult::new(
        successful.into_inner(),
        failed.into_inner(),
        attempts.into_inner(),
        start.elapsed(),
    )
}

/// `threads` threads each increment `key` once in a transaction that
/// retries until it commits.
pub fn increment_concurrently(ds: &dyn RawDatastore, key: &Key, threads: usize) -> StressTestResult {
    let config = StressConfig {
        threads,
        ops_per_thread: 1,
        options: TransactionOptions::new().retry_forever(),
    };
    stress_increments(ds, key, &config)
}

/// Puts one entity per operation under an incomplete `kind` key and returns
/// every assigned key.
pub fn stress_allocations(ds: &dyn RawDatastore, kind: &str, config: &StressConfig) -> Vec<Key> {
    let incomplete = ds.key_context().incomplete_key(kind, None);
    thread::scope(|scope| {
        let handles: Vec<_> = (0..config.threads)
            .map(|t| {
                let incomplete = &incomplete;
                scope.spawn(move || {
                    (0..config.ops_per_thread)
                        .map(|i| {
                            let value = i64::try_from(t * config.ops_per_thread + i).unwrap_or(0);
                            ds.put_multi_collect(std::slice::from_ref(incomplete), &[value_map(value)])
                                .expect("put failed")
                                .pop()
                                .expect("put produced no result")
                                .expect("put item failed")
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().expect("Thread panicked"))
            .collect()
    })
}
