//! Snapshot-consistent traversal.
//!
//! An [`Iter`] captures the list's commit counter once and yields exactly
//! the elements visible at that snapshot. The captured value is announced
//! in the calling thread's `active_snapshot` cell for the lifetime of the
//! iterator, which stops reclaimers from unlinking nodes the snapshot can
//! still see.

use core::marker::PhantomData;
use core::ptr::{self, NonNull};

use crate::list::List;
use crate::local::{self, ThreadState};
use crate::node::Node;
use crate::ptr::AtomicMarkedPtr;
use crate::sync::Ordering::Acquire;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Iter
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A snapshot iterator over a [`List`], created by [`List::iter`].
///
/// Only the thread that created the iterator may drive it; the handle is
/// neither `Send` nor `Sync`. Dropping it retracts the announced snapshot.
pub struct Iter<'a, T> {
    list: &'a List<T>,
    walk: Walk<'a>,
    _not_send: PhantomData<*mut ()>,
}

/***** impl inherent ******************************************************************************/

impl<'a, T> Iter<'a, T> {
    pub(crate) fn new(list: &'a List<T>, snapshot: u64) -> Self {
        Self { list, walk: Walk::new(list.head(), snapshot), _not_send: PhantomData }
    }

    /// The commit value this iterator observes the list at.
    pub fn snapshot(&self) -> u64 {
        self.walk.snapshot
    }
}

/***** impl Iterator ******************************************************************************/

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = NonNull<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let state = local::bound_state(self.list.domain())?;
        self.walk
            .next_visible(state)
            // elements are non-null by construction (insert takes `NonNull`)
            .map(|elem| unsafe { NonNull::new_unchecked(elem.cast()) })
    }
}

/***** impl Drop **********************************************************************************/

impl<T> Drop for Iter<'_, T> {
    fn drop(&mut self) {
        if let Some(state) = local::bound_state(self.list.domain()) {
            state.set_active_snapshot(0);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Walk
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The protected visibility walk shared by the iterator and the queries.
///
/// Walk state survives between calls: `current` is the node last yielded
/// and `below` its insert transaction id. The head chain is strictly
/// decreasing in `insert_txn`, so if `current` has been unlinked in the
/// meantime the walk can restart from head and skip every id at or above
/// `below` without yielding duplicates.
pub(crate) struct Walk<'a> {
    head: &'a AtomicMarkedPtr<Node>,
    snapshot: u64,
    current: *mut Node,
    below: u64,
}

/***** impl inherent ******************************************************************************/

impl<'a> Walk<'a> {
    pub fn new(head: &'a AtomicMarkedPtr<Node>, snapshot: u64) -> Self {
        Self { head, snapshot, current: ptr::null_mut(), below: u64::MAX }
    }

    /// Yields the element of the next node visible at the snapshot.
    ///
    /// Every inspected node is published to hazard slot 0 and validated to
    /// still be reachable before its fields are trusted; a node that fails
    /// validation restarts the walk from head. Hazards are retracted before
    /// each return.
    pub fn next_visible(&mut self, state: &ThreadState) -> Option<*mut ()> {
        let mut curr = if self.current.is_null() {
            self.head.load(Acquire).as_ptr()
        } else {
            // (ITR:1) re-anchor on the node yielded last time; it may have
            // been unlinked between calls, in which case its `next` is no
            // longer a chain link and the walk restarts from head
            state.protect(0, self.current);
            if reachable(self.head, self.current) {
                let next = unsafe { (*self.current).next.load(Acquire).as_ptr() };
                state.clear(0);
                next
            } else {
                state.clear(0);
                self.head.load(Acquire).as_ptr()
            }
        };

        while let Some(node) = NonNull::new(curr) {
            state.protect(0, node.as_ptr());
            // (ITR:2) the hazard only protects the node if it was still
            // reachable after publication
            if !reachable(self.head, node.as_ptr()) {
                state.clear(0);
                curr = self.head.load(Acquire).as_ptr();
                continue;
            }

            let node_ref = unsafe { node.as_ref() };
            if node_ref.insert_txn < self.below && node_ref.is_visible_at(self.snapshot) {
                let elem = node_ref.elem;
                self.current = node.as_ptr();
                self.below = node_ref.insert_txn;
                state.clear(0);
                return Some(elem);
            }

            let next = node_ref.next.load(Acquire).as_ptr();
            state.clear(0);
            curr = next;
        }

        None
    }
}

/// Address scan of the head chain. Touches nothing but `next` fields, so
/// it needs no hazard of its own.
pub(crate) fn reachable(head: &AtomicMarkedPtr<Node>, target: *mut Node) -> bool {
    let mut scan = head.load(Acquire).as_ptr();
    while !scan.is_null() {
        if scan == target {
            return true;
        }
        scan = unsafe { (*scan).next.load(Acquire).as_ptr() };
    }
    false
}
