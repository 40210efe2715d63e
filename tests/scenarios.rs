#![cfg(not(loom))]

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::sync::Arc;

use mvlist::{Domain, Error, List};

fn setup() -> (Arc<Domain>, List<u64>) {
    let domain = Arc::new(Domain::new());
    domain.register().unwrap();
    let list = List::new(Arc::clone(&domain));
    (domain, list)
}

#[test]
fn insert_is_visible() {
    let (domain, list) = setup();
    let a = 1u64;

    list.insert_head(NonNull::from(&a)).unwrap();

    let mut iter = list.iter().unwrap();
    assert_eq!(iter.snapshot(), 2);
    assert_eq!(iter.next(), Some(NonNull::from(&a)));
    assert_eq!(iter.next(), None);
    drop(iter);

    assert_eq!(list.count(), 1);
    assert!(!list.is_empty());
    assert!(list.contains(NonNull::from(&a)));

    drop(list);
    domain.unregister();
}

#[test]
fn snapshot_excludes_simultaneous_insert() {
    let (domain, list) = setup();
    let a = 1u64;

    let mut iter = list.iter().unwrap();
    assert_eq!(iter.snapshot(), 1);

    list.insert_head(NonNull::from(&a)).unwrap();
    // insert_txn == snapshot is not visible (strict comparison)
    assert_eq!(iter.next(), None);
    drop(iter);

    let mut iter = list.iter().unwrap();
    assert_eq!(iter.snapshot(), 2);
    assert_eq!(iter.next(), Some(NonNull::from(&a)));
    drop(iter);

    drop(list);
    domain.unregister();
}

#[test]
fn remove_hides_at_same_version_snapshot() {
    let (domain, list) = setup();
    let (a, b) = (1u64, 2u64);

    list.insert_head(NonNull::from(&a)).unwrap();
    list.insert_head(NonNull::from(&b)).unwrap();

    let mut iter = list.iter().unwrap();
    assert_eq!(iter.snapshot(), 3);

    // removed_txn == snapshot is not visible (strict comparison)
    list.remove(NonNull::from(&a)).unwrap();
    assert_eq!(iter.next(), Some(NonNull::from(&b)));
    assert_eq!(iter.next(), None);
    drop(iter);

    drop(list);
    domain.unregister();
}

#[test]
fn older_snapshot_still_sees_later_removal() {
    let (domain, list) = setup();
    let (a, b, c) = (1u64, 2u64, 3u64);

    list.insert_head(NonNull::from(&a)).unwrap();
    list.insert_head(NonNull::from(&b)).unwrap();

    let mut iter = list.iter().unwrap();
    assert_eq!(iter.snapshot(), 3);

    // both mutations postdate the snapshot
    list.insert_head(NonNull::from(&c)).unwrap();
    list.remove(NonNull::from(&a)).unwrap();

    // c is too new; a was removed strictly after the snapshot and stays
    // visible to it
    assert_eq!(iter.next(), Some(NonNull::from(&b)));
    assert_eq!(iter.next(), Some(NonNull::from(&a)));
    assert_eq!(iter.next(), None);
    drop(iter);

    // a fresh snapshot no longer sees a
    let mut iter = list.iter().unwrap();
    assert_eq!(iter.snapshot(), 5);
    assert_eq!(iter.next(), Some(NonNull::from(&c)));
    assert_eq!(iter.next(), Some(NonNull::from(&b)));
    assert_eq!(iter.next(), None);
    drop(iter);

    drop(list);
    domain.unregister();
}

#[test]
fn iteration_is_lifo() {
    let (domain, list) = setup();
    let elems = [1u64, 2, 3];

    for elem in &elems {
        list.insert_head(NonNull::from(elem)).unwrap();
    }

    let collected: Vec<_> = list.iter().unwrap().collect();
    let expected: Vec<_> = elems.iter().rev().map(|elem| NonNull::from(elem)).collect();
    assert_eq!(collected, expected);

    drop(list);
    domain.unregister();
}

static RECLAIM_DROPS: AtomicUsize = AtomicUsize::new(0);

unsafe fn count_reclaim_drop(_elem: *mut ()) {
    RECLAIM_DROPS.fetch_add(1, Relaxed);
}

#[test]
fn reclaim_frees_unlinked_nodes_once() {
    let (domain, list) = setup();
    let a = 1u64;

    list.insert_head(NonNull::from(&a)).unwrap();
    list.remove(NonNull::from(&a)).unwrap();

    list.reclaim(Some(count_reclaim_drop));
    assert_eq!(RECLAIM_DROPS.load(Relaxed), 1);
    assert!(list.is_empty());

    // a second pass has nothing left to do
    list.reclaim(Some(count_reclaim_drop));
    assert_eq!(RECLAIM_DROPS.load(Relaxed), 1);

    drop(list);
    domain.unregister();
}

static DEFERRED_DROPS: AtomicUsize = AtomicUsize::new(0);

unsafe fn count_deferred_drop(_elem: *mut ()) {
    DEFERRED_DROPS.fetch_add(1, Relaxed);
}

#[test]
fn active_snapshot_defers_unlinking() {
    let (domain, list) = setup();
    let a = 1u64;

    list.insert_head(NonNull::from(&a)).unwrap();

    let mut iter = list.iter().unwrap();
    assert_eq!(iter.next(), Some(NonNull::from(&a)));

    // removed at the snapshot itself: not strictly below it, so the node
    // must survive this reclaim pass
    list.remove(NonNull::from(&a)).unwrap();
    list.reclaim(Some(count_deferred_drop));
    assert_eq!(DEFERRED_DROPS.load(Relaxed), 0);

    drop(iter);

    // no active snapshot anymore: now it goes
    list.reclaim(Some(count_deferred_drop));
    assert_eq!(DEFERRED_DROPS.load(Relaxed), 1);

    drop(list);
    domain.unregister();
}

#[test]
fn remove_is_idempotent() {
    let (domain, list) = setup();
    let a = 1u64;

    list.insert_head(NonNull::from(&a)).unwrap();
    assert_eq!(list.remove(NonNull::from(&a)), Ok(()));
    assert_eq!(list.remove(NonNull::from(&a)), Err(Error::NotFound));

    drop(list);
    domain.unregister();
}

#[test]
fn snapshots_are_monotonic() {
    let (domain, list) = setup();
    let elems = [1u64, 2, 3];

    let mut last = 0;
    for elem in &elems {
        let iter = list.iter().unwrap();
        assert!(iter.snapshot() > last);
        last = iter.snapshot();
        drop(iter);

        list.insert_head(NonNull::from(elem)).unwrap();
    }

    // every version-producing operation bumps the counter by exactly one
    assert_eq!(list.iter().unwrap().snapshot(), 1 + elems.len() as u64);

    drop(list);
    domain.unregister();
}

#[test]
fn remove_first_dequeues_in_lifo_order() {
    let (domain, list) = setup();
    let elems = [1u64, 2, 3];

    for elem in &elems {
        list.insert_head(NonNull::from(elem)).unwrap();
    }

    assert_eq!(list.remove_first(), Ok(NonNull::from(&elems[2])));
    assert_eq!(list.remove_first(), Ok(NonNull::from(&elems[1])));
    assert_eq!(list.remove_first(), Ok(NonNull::from(&elems[0])));
    assert_eq!(list.remove_first(), Err(Error::NotFound));

    drop(list);
    domain.unregister();
}

#[test]
fn remove_first_skips_logically_removed_head() {
    let (domain, list) = setup();
    let (a, b) = (1u64, 2u64);

    list.insert_head(NonNull::from(&a)).unwrap();
    list.insert_head(NonNull::from(&b)).unwrap();
    list.remove(NonNull::from(&b)).unwrap();

    // b still heads the chain but is no longer visible
    assert_eq!(list.remove_first(), Ok(NonNull::from(&a)));
    assert_eq!(list.remove_first(), Err(Error::NotFound));

    drop(list);
    domain.unregister();
}

#[test]
fn unregistered_threads_fail_fast() {
    let domain = Arc::new(Domain::new());
    let list = List::new(Arc::clone(&domain));
    let a = 1u64;

    assert_eq!(list.insert_head(NonNull::from(&a)), Err(Error::NoThread));
    assert_eq!(list.remove(NonNull::from(&a)), Err(Error::NoThread));
    assert_eq!(list.remove_first(), Err(Error::NoThread));
    assert!(list.iter().is_err());

    // queries degrade to the empty view instead
    assert!(list.is_empty());
    assert!(!list.contains(NonNull::from(&a)));
    assert_eq!(list.count(), 0);
}

#[test]
fn one_iteration_per_thread() {
    let (domain, list) = setup();
    let second = List::<u64>::new(Arc::clone(&domain));

    let iter = list.iter().unwrap();
    assert!(matches!(list.iter(), Err(Error::Inval)));
    // the gate is per thread, not per list
    assert!(matches!(second.iter(), Err(Error::Inval)));
    drop(iter);

    assert!(list.iter().is_ok());

    drop(second);
    drop(list);
    domain.unregister();
}

static DESTROY_DROPS: AtomicUsize = AtomicUsize::new(0);

unsafe fn count_destroy_drop(_elem: *mut ()) {
    DESTROY_DROPS.fetch_add(1, Relaxed);
}

#[test]
fn destroy_frees_remaining_nodes() {
    let (domain, list) = setup();
    let elems = [1u64, 2, 3];

    for elem in &elems {
        list.insert_head(NonNull::from(elem)).unwrap();
    }
    // one logically removed node still hangs in the chain
    list.remove(NonNull::from(&elems[1])).unwrap();

    list.destroy(Some(count_destroy_drop));
    assert_eq!(DESTROY_DROPS.load(Relaxed), elems.len());

    domain.unregister();
}

#[test]
fn queries_track_the_current_version() {
    let (domain, list) = setup();
    let (a, b) = (1u64, 2u64);

    assert!(list.is_empty());
    list.insert_head(NonNull::from(&a)).unwrap();
    list.insert_head(NonNull::from(&b)).unwrap();
    assert_eq!(list.count(), 2);

    list.remove(NonNull::from(&a)).unwrap();
    assert_eq!(list.count(), 1);
    assert!(!list.contains(NonNull::from(&a)));
    assert!(list.contains(NonNull::from(&b)));

    drop(list);
    domain.unregister();
}
