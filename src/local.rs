//! Per-thread reclamation state and the calling thread's domain binding.
//!
//! Every registered thread owns one [`ThreadState`] inside its domain's
//! slot table: two hazard cells (enough for prev/curr hand-over-hand
//! traversal), the announced snapshot of an in-flight iteration, and the
//! thread-local stack of unlinked-but-not-yet-freed nodes. The binding
//! from an OS thread to its `(domain, state)` pair lives in TLS.

use core::cell::{Cell, UnsafeCell};
use core::ptr::{self, NonNull};

use crossbeam_utils::CachePadded;

use crate::domain::Domain;
use crate::node::Node;
use crate::ptr::MarkedPtr;
use crate::sync::{
    AtomicBool, AtomicPtr, AtomicU64,
    Ordering::{AcqRel, Acquire, Relaxed, Release},
};

/// Hazard cells per thread: slot 0 and slot 1 cover the prev/curr pair of
/// a two-step traversal.
pub(crate) const HAZARDS_PER_THREAD: usize = 2;

////////////////////////////////////////////////////////////////////////////////////////////////////
// ThreadState
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The reclamation state of one registered thread.
pub(crate) struct ThreadState {
    /// Published pointers that must not be freed while present here.
    hazards: CachePadded<[AtomicPtr<Node>; HAZARDS_PER_THREAD]>,
    /// The snapshot of an in-flight iteration; 0 = no active observer.
    active_snapshot: AtomicU64,
    /// Head of the thread-local retired stack, linked through the retired
    /// nodes' `next` fields.
    retired: UnsafeCell<*mut Node>,
    /// Slot claim flag; cleared slots may be re-claimed by other threads.
    in_use: AtomicBool,
}

// The `retired` cell is only accessed by the thread currently claiming the
// slot, or during domain teardown under exclusive access.
unsafe impl Send for ThreadState {}
unsafe impl Sync for ThreadState {}

/***** impl inherent ******************************************************************************/

impl ThreadState {
    /// Creates a claimed state for a freshly registered thread.
    pub fn new() -> Self {
        Self {
            hazards: CachePadded::new([AtomicPtr::new(ptr::null_mut()), AtomicPtr::new(ptr::null_mut())]),
            active_snapshot: AtomicU64::new(0),
            retired: UnsafeCell::new(ptr::null_mut()),
            in_use: AtomicBool::new(true),
        }
    }

    /// Attempts to claim an abandoned slot for the calling thread.
    ///
    /// The acquire side of the swap synchronizes-with the release in
    /// [`release_claim`](Self::release_claim), so the claimant observes the
    /// previous owner's cleared hazards and inherits its retired stack.
    #[inline]
    pub fn try_claim(&self) -> bool {
        self.in_use.compare_exchange(false, true, AcqRel, Relaxed).is_ok()
    }

    /// Marks the slot as available for reuse.
    #[inline]
    pub fn release_claim(&self) {
        self.in_use.store(false, Release);
    }

    /// Publishes `ptr` in the given hazard cell.
    ///
    /// Publication alone is not protection: the caller must re-load the
    /// source of `ptr` afterwards and confirm the node is still reachable.
    #[inline]
    pub fn protect(&self, slot: usize, ptr: *mut Node) {
        // (HAZ:1) this `Release` store synchronizes-with the `Acquire`
        // hazard scan of the reclaimers
        self.hazards[slot].store(ptr, Release);
    }

    /// Retracts the hazard in `slot`.
    #[inline]
    pub fn clear(&self, slot: usize) {
        self.hazards[slot].store(ptr::null_mut(), Release);
    }

    /// Retracts both hazards.
    #[inline]
    pub fn clear_hazards(&self) {
        for slot in 0..HAZARDS_PER_THREAD {
            self.clear(slot);
        }
    }

    /// Returns `true` if either hazard cell currently equals `ptr`.
    #[inline]
    pub fn protects(&self, ptr: *mut Node) -> bool {
        // (HAZ:2) these `Acquire` loads synchronize-with (HAZ:1)
        self.hazards.iter().any(|cell| cell.load(Acquire) == ptr)
    }

    #[inline]
    pub fn active_snapshot(&self) -> u64 {
        self.active_snapshot.load(Acquire)
    }

    /// Announces (nonzero) or retracts (0) the thread's iteration snapshot.
    #[inline]
    pub fn set_active_snapshot(&self, snapshot: u64) {
        self.active_snapshot.store(snapshot, Release);
    }

    /// Pushes an unlinked node onto the retired stack, overloading its
    /// `next` field as the stack link. `surrendered` records (in the link's
    /// mark bit) that the element handle has already been handed to a
    /// caller, so the eventual free must not run the destructor on it.
    ///
    /// # Safety
    ///
    /// The caller must own the slot claim, and the node must already have
    /// been unlinked by a successful CAS on its predecessor.
    #[inline]
    pub unsafe fn push_retired(&self, node: NonNull<Node>, surrendered: bool) {
        let head = *self.retired.get();
        node.as_ref().next.store(MarkedPtr::compose(head, surrendered), Relaxed);
        *self.retired.get() = node.as_ptr();
    }

    /// Detaches and returns the whole retired stack.
    ///
    /// # Safety
    ///
    /// The caller must own the slot claim.
    #[inline]
    pub unsafe fn take_retired(&self) -> *mut Node {
        ptr::replace(self.retired.get(), ptr::null_mut())
    }

    /// Reattaches nodes that could not be freed yet.
    ///
    /// # Safety
    ///
    /// The caller must own the slot claim.
    #[inline]
    pub unsafe fn set_retired(&self, head: *mut Node) {
        *self.retired.get() = head;
    }

    /// Frees every record on the retired stack without running element
    /// destructors. Used by domain teardown only.
    ///
    /// # Safety
    ///
    /// Requires exclusive access to the domain (no registered threads, no
    /// live lists).
    pub unsafe fn drain_retired(&self) {
        let mut curr = self.take_retired();
        while let Some(node) = NonNull::new(curr) {
            curr = node.as_ref().retired_link();
            Node::dealloc(node);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Thread-local binding
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Copy, Clone)]
struct Binding {
    domain: *const Domain,
    state: *const ThreadState,
}

crate::sync::thread_local! {
    static BINDING: Cell<Binding> =
        Cell::new(Binding { domain: ptr::null(), state: ptr::null() });
}

/// Returns the calling thread's state in `domain`, if it is registered there.
#[inline]
pub(crate) fn bound_state(domain: &Domain) -> Option<&ThreadState> {
    BINDING.with(|cell| {
        let binding = cell.get();
        if ptr::eq(binding.domain, domain) {
            // the state is owned by the domain and outlives the binding
            Some(unsafe { &*binding.state })
        } else {
            None
        }
    })
}

/// Binds the calling thread to `(domain, state)`. A previous binding to a
/// different domain is replaced; its slot remains claimed until that domain
/// is asked to unregister.
#[inline]
pub(crate) fn bind(domain: &Domain, state: &ThreadState) {
    BINDING.with(|cell| {
        cell.set(Binding { domain, state });
    });
}

/// Forgets the calling thread's binding.
#[inline]
pub(crate) fn unbind() {
    BINDING.with(|cell| {
        cell.set(Binding { domain: ptr::null(), state: ptr::null() });
    });
}
