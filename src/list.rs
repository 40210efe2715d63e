//! The list head and its operations.

use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::domain::Domain;
use crate::iter::{reachable, Iter, Walk};
use crate::local::{self, ThreadState};
use crate::node::Node;
use crate::ptr::{AtomicMarkedPtr, MarkedPtr};
use crate::sync::{
    AtomicU64,
    Ordering::{AcqRel, Acquire, Relaxed, Release},
};
use crate::{Destructor, Error, Result};

////////////////////////////////////////////////////////////////////////////////////////////////////
// List
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A concurrent, append-at-head singly linked list with multi-version
/// visibility.
///
/// The list stores opaque element handles (`NonNull<T>`); it never
/// dereferences them, never compares beyond pointer identity, and frees
/// them only through a caller-supplied [`Destructor`]. Every mutation
/// draws a transaction id from the list's commit counter; traversals
/// capture the counter once and observe exactly the versions visible at
/// that snapshot.
///
/// All mutating and iterating operations require the calling thread to be
/// [registered](Domain::register) with the list's domain.
pub struct List<T> {
    head: AtomicMarkedPtr<Node>,
    commit: CachePadded<AtomicU64>,
    domain: Arc<Domain>,
    _elem: PhantomData<*mut T>,
}

// Elements are opaque handles owned by the caller; the list itself only
// stores and returns them.
unsafe impl<T: Send> Send for List<T> {}
unsafe impl<T: Send> Sync for List<T> {}

/***** impl inherent ******************************************************************************/

impl<T> List<T> {
    /// Creates an empty list bound to `domain`. The commit counter starts
    /// at 1, so the first operation is assigned transaction id 1.
    pub fn new(domain: Arc<Domain>) -> Self {
        Self {
            head: AtomicMarkedPtr::null(),
            commit: CachePadded::new(AtomicU64::new(1)),
            domain,
            _elem: PhantomData,
        }
    }

    /// Inserts `elem` at the head of the list.
    ///
    /// # Errors
    ///
    /// [`Error::NoThread`] if the calling thread is not registered with the
    /// list's domain, [`Error::NoMem`] if node allocation fails (in which
    /// case the commit counter is untouched).
    pub fn insert_head(&self, elem: NonNull<T>) -> Result<()> {
        self.state().ok_or(Error::NoThread)?;

        // allocate before drawing a commit value, so a failed allocation
        // cannot leave a hole in the version sequence
        let raw = Node::try_alloc().ok_or(Error::NoMem)?;
        // (LST:1) acq-rel fetch-add: the insert linearizes here
        let txn = self.commit.fetch_add(1, AcqRel);
        let node = unsafe { Node::init(raw, elem.as_ptr().cast(), txn) };

        // no hazard: the node is unreachable until the CAS succeeds
        loop {
            let head = self.head.load(Acquire);
            unsafe { node.as_ref() }.next.store(head, Relaxed);

            // (LST:2) this `Release` CAS publishes the node and
            // synchronizes-with every `Acquire` load of the head
            if self
                .head
                .compare_exchange_weak(head, MarkedPtr::from_ptr(node.as_ptr()), Release, Relaxed)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Logically removes the first live node holding `elem`.
    ///
    /// The node stays linked; it merely becomes invisible to snapshots
    /// taken after the remove. Physical unlinking happens in
    /// [`reclaim`](List::reclaim).
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no live node holds `elem`,
    /// [`Error::NoThread`] if the calling thread is not registered.
    pub fn remove(&self, elem: NonNull<T>) -> Result<()> {
        let state = self.state().ok_or(Error::NoThread)?;
        let elem = elem.as_ptr().cast::<()>();

        let txn = self.commit.fetch_add(1, AcqRel);

        let mut curr = self.head.load(Acquire).as_ptr();
        while let Some(node) = NonNull::new(curr) {
            state.protect(0, node.as_ptr());
            // coarse validation: the hazard protects the node only if it is
            // still in the chain after publication
            if !reachable(&self.head, node.as_ptr()) {
                state.clear(0);
                curr = self.head.load(Acquire).as_ptr();
                continue;
            }

            let node_ref = unsafe { node.as_ref() };
            if node_ref.elem == elem {
                // (LST:3) the 0 -> txn transition happens exactly once; a
                // lost race means another remove owns this node already and
                // the search continues for a further live copy
                if node_ref.removed_txn.compare_exchange(0, txn, Release, Relaxed).is_ok() {
                    state.clear(0);
                    return Ok(());
                }
            }

            let next = node_ref.next.load(Acquire).as_ptr();
            state.clear(0);
            curr = next;
        }

        Err(Error::NotFound)
    }

    /// Unlinks the first node visible at the current commit value and
    /// returns its element. Unlike [`remove`](List::remove) this frees the
    /// node record immediately; ownership of the element passes back to
    /// the caller, so no destructor will ever run for it.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no visible node exists, [`Error::NoThread`]
    /// if the calling thread is not registered.
    pub fn remove_first(&self) -> Result<NonNull<T>> {
        let state = self.state().ok_or(Error::NoThread)?;
        let snapshot = self.commit.load(Acquire);

        'restart: loop {
            let head = self.head.load(Acquire);
            let Some(first) = NonNull::new(head.as_ptr()) else {
                return Err(Error::NotFound);
            };

            state.protect(0, first.as_ptr());
            // (LST:4) the head candidate counts only if the head did not
            // move underneath the published hazard
            if self.head.load(Acquire) != head {
                state.clear(0);
                continue 'restart;
            }

            let first_ref = unsafe { first.as_ref() };
            if first_ref.is_visible_at(snapshot) {
                let next = first_ref.next.load(Acquire);
                if self.head.compare_exchange_weak(head, next, Release, Relaxed).is_ok() {
                    return Ok(self.surrender(state, first));
                }
                state.clear(0);
                continue 'restart;
            }

            // head not visible: walk for the first visible node, keeping
            // `prev` hazarded in slot 0 and the candidate in slot 1
            let mut prev = first;
            let mut curr = first_ref.next.load(Acquire).as_ptr();

            while let Some(node) = NonNull::new(curr) {
                state.protect(1, node.as_ptr());
                // (LST:5) the candidate counts only while it is still the
                // hazarded predecessor's successor
                if unsafe { prev.as_ref() }.next.load(Acquire).as_ptr() != node.as_ptr() {
                    state.clear_hazards();
                    continue 'restart;
                }

                let node_ref = unsafe { node.as_ref() };
                if node_ref.is_visible_at(snapshot) {
                    let next = node_ref.next.load(Acquire);
                    let expected = MarkedPtr::from_ptr(node.as_ptr());
                    let link = unsafe { &prev.as_ref().next };
                    if link.compare_exchange_weak(expected, next, Release, Relaxed).is_ok() {
                        return Ok(self.surrender(state, node));
                    }
                    state.clear_hazards();
                    continue 'restart;
                }

                // hand-over-hand advance: the candidate becomes the
                // hazarded predecessor
                state.protect(0, node.as_ptr());
                prev = node;
                curr = node_ref.next.load(Acquire).as_ptr();
            }

            state.clear_hazards();
            return Err(Error::NotFound);
        }
    }

    /// Finishes a successful unlink from [`remove_first`](List::remove_first):
    /// takes the element out of the node and frees the record, deferring to
    /// the retired stack if a concurrent hazard still covers it.
    fn surrender(&self, state: &ThreadState, node: NonNull<Node>) -> NonNull<T> {
        let elem = unsafe { node.as_ref() }.elem;
        state.clear_hazards();

        if self.domain.any_hazard_equals(node.as_ptr()) {
            // a reader established its hazard before the unlink; the record
            // is freed by a later reclaim pass, without a destructor
            unsafe { state.push_retired(node, true) };
        } else {
            // no hazard can be established anymore: the node left the chain
            // with the unlink CAS
            unsafe { Node::dealloc(node) };
        }

        unsafe { NonNull::new_unchecked(elem.cast()) }
    }

    /// Begins a snapshot-consistent iteration.
    ///
    /// The captured snapshot is announced in the calling thread's
    /// reclamation state until the iterator is dropped.
    ///
    /// # Errors
    ///
    /// [`Error::NoThread`] if the calling thread is not registered,
    /// [`Error::Inval`] if it already has an iteration in flight (one per
    /// thread).
    pub fn iter(&self) -> Result<Iter<'_, T>> {
        let state = self.state().ok_or(Error::NoThread)?;
        if state.active_snapshot() != 0 {
            return Err(Error::Inval);
        }

        let snapshot = self.commit.load(Acquire);
        // (LST:6) announce before the first traversal step; reclaimers must
        // respect this snapshot as a lower bound from here on
        state.set_active_snapshot(snapshot);
        Ok(Iter::new(self, snapshot))
    }

    /// Returns `true` if no element is visible at the current commit value.
    ///
    /// An unregistered thread observes the list as empty.
    pub fn is_empty(&self) -> bool {
        let Some(state) = self.state() else { return true };
        let snapshot = self.commit.load(Acquire);
        Walk::new(&self.head, snapshot).next_visible(state).is_none()
    }

    /// Returns `true` if a node holding `elem` is visible at the current
    /// commit value.
    ///
    /// An unregistered thread observes the list as empty.
    pub fn contains(&self, elem: NonNull<T>) -> bool {
        let Some(state) = self.state() else { return false };
        let elem = elem.as_ptr().cast::<()>();
        let snapshot = self.commit.load(Acquire);

        let mut walk = Walk::new(&self.head, snapshot);
        while let Some(found) = walk.next_visible(state) {
            if found == elem {
                return true;
            }
        }
        false
    }

    /// Counts the elements visible at the current commit value.
    ///
    /// An unregistered thread observes the list as empty.
    pub fn count(&self) -> usize {
        let Some(state) = self.state() else { return 0 };
        let snapshot = self.commit.load(Acquire);

        let mut count = 0;
        let mut walk = Walk::new(&self.head, snapshot);
        while walk.next_visible(state).is_some() {
            count += 1;
        }
        count
    }

    /// Unlinks and frees logically removed nodes.
    ///
    /// Phase 1 unlinks every node whose removal precedes all active
    /// snapshots and pushes it on the calling thread's retired stack.
    /// Phase 2 frees retired nodes no hazard cell still covers, invoking
    /// `destructor` once per freed element. Nodes that cannot be freed yet
    /// stay retired for a later pass.
    ///
    /// The retired stack is per thread, not per list: a pass may free
    /// nodes retired from other lists sharing the domain, and applies this
    /// call's `destructor` to their elements.
    ///
    /// A no-op for unregistered threads.
    pub fn reclaim(&self, destructor: Option<Destructor>) {
        let Some(state) = self.state() else { return };

        // phase 1: unlink nodes no active snapshot can still see
        let mut min_active = self.domain.min_active_snapshot();
        if min_active == u64::MAX {
            min_active = self.commit.load(Acquire);
        }

        let mut prev: *mut Node = ptr::null_mut();
        let mut curr = self.head.load(Acquire).as_ptr();

        while let Some(node) = NonNull::new(curr) {
            state.protect(1, node.as_ptr());
            // the candidate counts only while it is still the successor of
            // the hazarded predecessor (or the head)
            let source_ok = if prev.is_null() {
                self.head.load(Acquire).as_ptr() == node.as_ptr()
            } else {
                unsafe { (*prev).next.load(Acquire).as_ptr() == node.as_ptr() }
            };
            if !source_ok {
                state.clear_hazards();
                prev = ptr::null_mut();
                curr = self.head.load(Acquire).as_ptr();
                continue;
            }

            let node_ref = unsafe { node.as_ref() };
            let removed = node_ref.removed_txn.load(Acquire);

            if removed != 0 && removed < min_active && self.is_linked_after(prev, node.as_ptr()) {
                let next = node_ref.next.load(Acquire);
                let expected = MarkedPtr::from_ptr(node.as_ptr());
                // (REC:1) this `Release` CAS takes the node out of the chain;
                // single-shot, so the strong variant (a spurious failure
                // would silently postpone the node)
                let unlinked = if prev.is_null() {
                    self.head.compare_exchange(expected, next, Release, Relaxed).is_ok()
                } else {
                    let link = unsafe { &(*prev).next };
                    link.compare_exchange(expected, next, Release, Relaxed).is_ok()
                };

                if unlinked {
                    state.clear(1);
                    // (REC:2) `next` may be overloaded as the retired link
                    // only now that the unlink CAS has committed
                    unsafe { state.push_retired(node, false) };
                    curr = next.as_ptr();
                    continue;
                }
                // failed CAS: leave the node for a later pass
            }

            // the node stays and becomes the hazarded predecessor
            state.protect(0, node.as_ptr());
            prev = node.as_ptr();
            curr = node_ref.next.load(Acquire).as_ptr();
        }
        state.clear_hazards();

        // phase 2: free retired nodes no hazard still covers
        let mut retired = unsafe { state.take_retired() };
        let mut deferred: *mut Node = ptr::null_mut();

        while let Some(node) = NonNull::new(retired) {
            let link = unsafe { node.as_ref() }.next.load(Relaxed);
            retired = link.as_ptr();
            let surrendered = link.is_marked();

            if self.domain.any_hazard_equals(node.as_ptr()) {
                unsafe { node.as_ref() }.next.store(MarkedPtr::compose(deferred, surrendered), Relaxed);
                deferred = node.as_ptr();
            } else {
                let elem = unsafe { node.as_ref() }.elem;
                unsafe { Node::dealloc(node) };
                if let Some(destructor) = destructor {
                    if !surrendered {
                        unsafe { destructor(elem) };
                    }
                }
            }
        }
        unsafe { state.set_retired(deferred) };
    }

    /// Quiescent teardown: frees every node still in the chain, invoking
    /// `destructor` on each element. The list must not be used
    /// concurrently. Nodes already moved to retired stacks belong to the
    /// domain and are freed there.
    pub fn destroy(mut self, destructor: Option<Destructor>) {
        self.purge(destructor);
    }

    fn purge(&mut self, destructor: Option<Destructor>) {
        let mut curr = self.head.load(Acquire).as_ptr();
        while let Some(node) = NonNull::new(curr) {
            let node_ref = unsafe { node.as_ref() };
            curr = node_ref.next.load(Acquire).as_ptr();
            let elem = node_ref.elem;
            if let Some(destructor) = destructor {
                unsafe { destructor(elem) };
            }
            unsafe { Node::dealloc(node) };
        }
        self.head.store(MarkedPtr::null(), Release);
    }

    /// Address-level predecessor check used to validate unlink candidates:
    /// `node` must currently follow `prev` (or be the head when `prev` is
    /// null). Touches only `next` fields.
    fn is_linked_after(&self, prev: *mut Node, node: *mut Node) -> bool {
        let mut last: *mut Node = ptr::null_mut();
        let mut scan = self.head.load(Acquire).as_ptr();
        while !scan.is_null() {
            if scan == node {
                return last == prev;
            }
            last = scan;
            scan = unsafe { (*scan).next.load(Acquire).as_ptr() };
        }
        false
    }

    #[inline]
    fn state(&self) -> Option<&ThreadState> {
        local::bound_state(&self.domain)
    }

    #[inline]
    pub(crate) fn head(&self) -> &AtomicMarkedPtr<Node> {
        &self.head
    }

    #[inline]
    pub(crate) fn domain(&self) -> &Domain {
        &self.domain
    }
}

/***** impl Drop **********************************************************************************/

impl<T> Drop for List<T> {
    fn drop(&mut self) {
        // silent teardown without a destructor; element handles remain the
        // caller's responsibility (use `destroy` to run one)
        self.purge(None);
    }
}
