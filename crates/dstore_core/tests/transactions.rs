//! Transaction behavior of the in-memory datastore.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dstore_core::{
    Config, CoreError, Datastore, Key, MemoryDatastore, PropertyMap, PropertyValue, Query,
    RawDatastore, TransactionOptions,
};

fn value(v: i64) -> PropertyMap {
    let mut pm = PropertyMap::new();
    pm.set("Value", v);
    pm
}

fn read_value(ds: &dyn RawDatastore, key: &Key) -> Option<i64> {
    let got = ds.get_multi_collect(std::slice::from_ref(key)).unwrap();
    got.into_iter()
        .next()
        .and_then(Result::ok)
        .and_then(|pm| pm.first("Value").and_then(PropertyValue::as_int))
}

fn put(ds: &dyn RawDatastore, key: &Key, v: i64) {
    let out = ds.put_multi_collect(std::slice::from_ref(key), &[value(v)]).unwrap();
    assert!(out[0].is_ok());
}

#[test]
fn writes_are_invisible_until_commit() {
    let ds = MemoryDatastore::new();
    let key = ds.key_context().new_key("Obj", 1, None);
    put(&ds, &key, 1);

    ds.run_in_transaction(
        &mut |txn| {
            txn.put_multi_collect(std::slice::from_ref(&key), &[value(2)])?;
            // Outside readers and the transaction itself still see the snapshot.
            assert_eq!(read_value(&ds, &key), Some(1));
            assert_eq!(read_value(txn, &key), Some(1));
            Ok(())
        },
        &TransactionOptions::new(),
    )
    .unwrap();
    assert_eq!(read_value(&ds, &key), Some(2));
}

#[test]
fn body_error_discards_writes() {
    let ds = MemoryDatastore::new();
    let key = ds.key_context().new_key("Obj", 1, None);
    let err = ds
        .run_in_transaction(
            &mut |txn| {
                txn.put_multi_collect(std::slice::from_ref(&key), &[value(2)])?;
                Err(CoreError::invalid_operation("abort"))
            },
            &TransactionOptions::new(),
        )
        .unwrap_err();
    assert_eq!(err, CoreError::invalid_operation("abort"));
    assert_eq!(ds.entity_count(), 0);
}

#[test]
fn interleaved_write_forces_a_retry() {
    let ds = MemoryDatastore::new();
    let key = ds.key_context().new_key("Obj", 1, None);
    put(&ds, &key, 0);
    let runs = AtomicUsize::new(0);

    ds.run_in_transaction(
        &mut |txn| {
            let attempt = runs.fetch_add(1, Ordering::SeqCst);
            let current = read_value(txn, &key).unwrap_or(0);
            if attempt == 0 {
                // Someone else commits to the same group mid-attempt.
                put(&ds, &key, 10);
            }
            txn.put_multi_collect(std::slice::from_ref(&key), &[value(current + 1)])?;
            Ok(())
        },
        &TransactionOptions::new(),
    )
    .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(read_value(&ds, &key), Some(11));
}

#[test]
fn conflicts_exhaust_attempts() {
    let ds = MemoryDatastore::new();
    let key = ds.key_context().new_key("Obj", 1, None);
    let runs = AtomicUsize::new(0);

    let err = ds
        .run_in_transaction(
            &mut |txn| {
                runs.fetch_add(1, Ordering::SeqCst);
                read_value(txn, &key);
                put(&ds, &key, 5);
                Ok(())
            },
            &TransactionOptions::new().attempts(4),
        )
        .unwrap_err();
    assert_eq!(err, CoreError::ConcurrentTransaction);
    assert_eq!(runs.load(Ordering::SeqCst), 4);
}

#[test]
fn forced_conflicts_use_the_retry_path() {
    let ds = MemoryDatastore::with_config(Config::new().forced_conflicts(2));
    let key = ds.key_context().new_key("Obj", 1, None);
    let runs = AtomicUsize::new(0);

    ds.run_in_transaction(
        &mut |txn| {
            runs.fetch_add(1, Ordering::SeqCst);
            txn.put_multi_collect(std::slice::from_ref(&key), &[value(1)])?;
            Ok(())
        },
        &TransactionOptions::new(),
    )
    .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(ds.entity_count(), 1);

    ds.set_transaction_retry_count(3);
    let err = ds
        .run_in_transaction(&mut |_| Ok(()), &TransactionOptions::new())
        .unwrap_err();
    assert_eq!(err, CoreError::ConcurrentTransaction);
}

#[test]
fn nested_transactions_are_rejected() {
    let ds = MemoryDatastore::new();
    let key = ds.key_context().new_key("Obj", 1, None);
    let mut inner = None;

    ds.run_in_transaction(
        &mut |txn| {
            inner = Some(txn.run_in_transaction(
                &mut |nested| {
                    nested.put_multi_collect(std::slice::from_ref(&key), &[value(1)])?;
                    Ok(())
                },
                &TransactionOptions::new(),
            ));
            Ok(())
        },
        &TransactionOptions::new(),
    )
    .unwrap();
    assert_eq!(inner, Some(Err(CoreError::NestedTransaction)));
    assert_eq!(ds.entity_count(), 0);
}

#[test]
fn disabled_transactions_never_run_the_body() {
    let ds = MemoryDatastore::with_config(Config::new().transactions_enabled(false));
    let runs = AtomicUsize::new(0);
    let err = ds
        .run_in_transaction(
            &mut |_| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            &TransactionOptions::new(),
        )
        .unwrap_err();
    assert_eq!(err, CoreError::TransactionsDisabled);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    ds.set_transactions_enabled(true);
    assert!(ds
        .run_in_transaction(&mut |_| Ok(()), &TransactionOptions::new())
        .is_ok());
}

#[test]
fn entity_group_limits() {
    let ds = MemoryDatastore::with_config(Config::new().max_xg_entity_groups(2));
    let ctx = ds.key_context();
    let a = ctx.new_key("Obj", 1, None);
    let b = ctx.new_key("Obj", 2, None);
    let c = ctx.new_key("Obj", 3, None);

    ds.run_in_transaction(
        &mut |txn| {
            let out = txn.put_multi_collect(&[a.clone(), b.clone()], &[value(1), value(2)])?;
            assert!(out[0].is_ok());
            assert_eq!(out[1], Err(CoreError::TooManyEntityGroups { limit: 1 }));
            Ok(())
        },
        &TransactionOptions::new(),
    )
    .unwrap();

    ds.run_in_transaction(
        &mut |txn| {
            let out = txn.put_multi_collect(
                &[a.clone(), b.clone(), c.clone()],
                &[value(1), value(2), value(3)],
            )?;
            assert!(out[0].is_ok());
            assert!(out[1].is_ok());
            assert_eq!(out[2], Err(CoreError::TooManyEntityGroups { limit: 2 }));
            Ok(())
        },
        &TransactionOptions::new().xg(true),
    )
    .unwrap();
    assert_eq!(ds.entity_count(), 2);
}

#[test]
fn children_share_their_root_group() {
    let ds = MemoryDatastore::new();
    let ctx = ds.key_context();
    let root = ctx.new_key("Parent", 1, None);
    let child = ctx.new_key("Child", 1, Some(&root));
    let grandchild = ctx.new_key("Child", 2, Some(&child));

    ds.run_in_transaction(
        &mut |txn| {
            let out = txn.put_multi_collect(
                &[root.clone(), child.clone(), grandchild.clone()],
                &[value(1), value(2), value(3)],
            )?;
            assert!(out.iter().all(Result::is_ok));
            Ok(())
        },
        &TransactionOptions::new(),
    )
    .unwrap();
    assert_eq!(ds.entity_count(), 3);
}

#[test]
fn read_only_transactions_reject_writes() {
    let ds = MemoryDatastore::new();
    let key = ds.key_context().new_key("Obj", 1, None);
    put(&ds, &key, 1);
    let err = ds
        .run_in_transaction(
            &mut |txn| {
                assert_eq!(read_value(txn, &key), Some(1));
                txn.put_multi_collect(std::slice::from_ref(&key), &[value(2)])?;
                Ok(())
            },
            &TransactionOptions::new().read_only(true),
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidOperation { .. }));
    assert_eq!(read_value(&ds, &key), Some(1));
}

#[test]
fn queries_in_transactions_need_an_ancestor() {
    let ds = MemoryDatastore::new();
    let ctx = ds.key_context();
    let root = ctx.new_key("Parent", 1, None);
    put(&ds, &ctx.new_key("Child", 1, Some(&root)), 1);
    put(&ds, &ctx.new_key("Child", 2, Some(&root)), 2);
    put(&ds, &ctx.new_key("Child", 3, None), 3);

    ds.run_in_transaction(
        &mut |txn| {
            let err = txn.run_collect(&Query::new("Child")).unwrap_err();
            assert!(matches!(err, CoreError::InvalidQuery { .. }));

            let rows = txn.run_collect(&Query::new("Child").ancestor(root.clone()))?;
            assert_eq!(rows.len(), 2);
            Ok(())
        },
        &TransactionOptions::new(),
    )
    .unwrap();
}

#[test]
fn incomplete_keys_are_completed_inside_transactions() {
    let ds = MemoryDatastore::new();
    let ctx = ds.key_context();
    let mut assigned = Vec::new();
    ds.run_in_transaction(
        &mut |txn| {
            let out = txn.put_multi_collect(&[ctx.incomplete_key("Thing", None)], &[value(1)])?;
            assigned = out.into_iter().collect::<Result<Vec<_>, _>>()?;
            Ok(())
        },
        &TransactionOptions::new(),
    )
    .unwrap();
    assert_eq!(assigned.len(), 1);
    assert!(!assigned[0].is_incomplete());
    assert_eq!(read_value(&ds, &assigned[0]), Some(1));
}

#[test]
fn commit_hooks_run_once_for_the_committed_attempt() {
    let ds = MemoryDatastore::with_config(Config::new().forced_conflicts(1));
    let fired = Arc::new(AtomicUsize::new(0));
    let facade = Datastore::new(&ds);

    facade
        .run_in_transaction(
            |txn| {
                let fired = Arc::clone(&fired);
                txn.on_commit(move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                })
            },
            &TransactionOptions::new(),
        )
        .unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(facade.on_commit(|| {}).is_err());
}
