//! Process-scoped registry of per-thread reclamation state.
//!
//! A [`Domain`] owns a growable table of [`ThreadState`] slots and is
//! shared by any number of lists. Lists bound to the same domain share its
//! reclamation guarantees: a reclaimer consults every slot's hazard cells
//! and active snapshot before it unlinks or frees anything.

use core::ptr;

use crate::local::{self, ThreadState};
use crate::node::Node;
use crate::sync::{
    spin_loop, AtomicBool, AtomicPtr, AtomicUsize,
    Ordering::{AcqRel, Acquire, Relaxed, Release},
};
use crate::Result;

include!(concat!(env!("OUT_DIR"), "/build_constants.rs"));

////////////////////////////////////////////////////////////////////////////////////////////////////
// Domain
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A reclamation domain: the shared registry of all threads that operate
/// on the lists bound to it.
///
/// A thread must [`register`](Domain::register) with a domain before it
/// mutates, iterates or reclaims any list bound to that domain, and should
/// [`unregister`](Domain::unregister) when it is done. Dropping a domain
/// while lists still reference it or threads are still registered is a
/// caller error (the drop itself only frees the domain's own storage).
pub struct Domain {
    /// Current slot table. Superseded tables stay alive on the table's
    /// `prev` chain until the domain is dropped, so a reader may keep
    /// using any table pointer it has already observed.
    table: AtomicPtr<SlotTable>,
    /// Number of slot indices ever reserved (claimed slots have smaller
    /// indices by construction).
    count: AtomicUsize,
    /// Test-and-set latch serializing table growth.
    resize_latch: AtomicBool,
}

unsafe impl Send for Domain {}
unsafe impl Sync for Domain {}

/***** impl inherent ******************************************************************************/

impl Domain {
    /// Creates a domain with the default thread capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_THREAD_CAPACITY)
    }

    /// Creates a domain with room for `initial_threads` registered threads
    /// before the first table growth. 0 selects the default capacity.
    pub fn with_capacity(initial_threads: usize) -> Self {
        let capacity = match initial_threads {
            0 => DEFAULT_THREAD_CAPACITY,
            n => n,
        };
        Self {
            table: AtomicPtr::new(SlotTable::boxed(capacity, ptr::null_mut())),
            count: AtomicUsize::new(0),
            resize_latch: AtomicBool::new(false),
        }
    }

    /// Registers the calling thread with this domain.
    ///
    /// Idempotent for a thread that is already registered here. A slot
    /// abandoned by an unregistered thread is re-claimed in preference to
    /// growing the table; its retired stack is inherited and swept by the
    /// claimant's next reclaim pass.
    pub fn register(&self) -> Result<()> {
        if local::bound_state(self).is_some() {
            return Ok(());
        }

        // claim an abandoned slot first
        let table = self.table();
        for idx in 0..table.capacity {
            // (DOM:1) this `Acquire` load synchronizes-with the `Release`
            // slot publication (DOM:2)
            let slot = table.slots[idx].load(Acquire);
            if let Some(state) = unsafe { slot.as_ref() } {
                if state.try_claim() {
                    local::bind(self, state);
                    return Ok(());
                }
            }
        }

        // no free slot: reserve a fresh index
        let idx = self.count.fetch_add(1, AcqRel);
        if idx >= self.table().capacity {
            self.grow(idx + 1);
        }

        let state = Box::into_raw(Box::new(ThreadState::new()));
        loop {
            let table = self.table();
            // (DOM:2) this `Release` store synchronizes-with (DOM:1) and the
            // scan loads (DOM:5)
            table.slots[idx].store(state, Release);
            // a concurrent growth may have copied the table before the store
            // landed; re-publish into the replacement until the table is
            // stable
            if ptr::eq(table, self.table()) {
                break;
            }
        }

        local::bind(self, unsafe { &*state });
        Ok(())
    }

    /// Unregisters the calling thread.
    ///
    /// Clears the thread's hazard cells and active snapshot and marks its
    /// slot free for reuse. The slot's retired stack stays attached: no
    /// element destructors run here. Idempotent for unbound threads.
    pub fn unregister(&self) {
        if let Some(state) = local::bound_state(self) {
            state.clear_hazards();
            state.set_active_snapshot(0);
            state.release_claim();
            local::unbind();
        }
    }

    /// Grows the slot table to hold at least `needed` slots.
    fn grow(&self, needed: usize) {
        // (DOM:3) single resizer at a time; the latch also orders the old
        // table's contents before the copy
        while self.resize_latch.swap(true, Acquire) {
            spin_loop();
        }

        let old = self.table.load(Acquire);
        let old_cap = unsafe { (*old).capacity };
        if needed <= old_cap {
            self.resize_latch.store(false, Release);
            return;
        }

        let new_cap = (old_cap * 2).max(needed).next_power_of_two();
        let table = SlotTable::boxed(new_cap, old);
        unsafe {
            for idx in 0..old_cap {
                let slot = (*old).slots[idx].load(Acquire);
                (*table).slots[idx].store(slot, Relaxed);
            }
        }

        // (DOM:4) this `Release` store synchronizes-with the `Acquire` table
        // loads; the old table stays readable on the `prev` chain
        self.table.store(table, Release);
        self.resize_latch.store(false, Release);
    }

    /// The smallest nonzero announced snapshot, or `u64::MAX` when no
    /// observer is active.
    pub(crate) fn min_active_snapshot(&self) -> u64 {
        let mut min = u64::MAX;
        self.for_each_state(|state| {
            let snapshot = state.active_snapshot();
            if snapshot != 0 && snapshot < min {
                min = snapshot;
            }
        });
        min
    }

    /// Scans every slot's hazard cells for `ptr`.
    ///
    /// The scan races with concurrent publications; the contract is
    /// asymmetric. `false` is authoritative for a node that is already
    /// unreachable (no thread can validly publish it anymore), `true`
    /// obliges the caller to defer.
    pub(crate) fn any_hazard_equals(&self, ptr: *mut Node) -> bool {
        let mut found = false;
        self.for_each_state(|state| {
            if state.protects(ptr) {
                found = true;
            }
        });
        found
    }

    #[inline]
    fn for_each_state(&self, mut f: impl FnMut(&ThreadState)) {
        let table = self.table();
        let count = self.count.load(Acquire).min(table.capacity);
        for idx in 0..count {
            // (DOM:5) this `Acquire` load synchronizes-with (DOM:2)
            let slot = table.slots[idx].load(Acquire);
            if let Some(state) = unsafe { slot.as_ref() } {
                f(state);
            }
        }
    }

    #[inline]
    fn table(&self) -> &SlotTable {
        unsafe { &*self.table.load(Acquire) }
    }
}

/***** impl Default *******************************************************************************/

impl Default for Domain {
    fn default() -> Self {
        Self::new()
    }
}

/***** impl Drop **********************************************************************************/

impl Drop for Domain {
    fn drop(&mut self) {
        unsafe {
            // the newest table holds every slot pointer ever published
            let newest = self.table.load(Relaxed);
            for idx in 0..(*newest).capacity {
                let slot = (*newest).slots[idx].load(Relaxed);
                if let Some(state) = slot.as_ref() {
                    state.drain_retired();
                    drop(Box::from_raw(slot));
                }
            }

            let mut table = newest;
            while !table.is_null() {
                let prev = (*table).prev;
                drop(Box::from_raw(table));
                table = prev;
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// SlotTable
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One generation of the slot table. The capacity travels with the table
/// allocation, so a reader can never observe a table/capacity pair torn.
struct SlotTable {
    capacity: usize,
    /// The table this one replaced; freed with the domain.
    prev: *mut SlotTable,
    slots: Box<[AtomicPtr<ThreadState>]>,
}

impl SlotTable {
    fn boxed(capacity: usize, prev: *mut SlotTable) -> *mut SlotTable {
        let slots = (0..capacity).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        Box::into_raw(Box::new(SlotTable { capacity, prev, slots }))
    }
}
