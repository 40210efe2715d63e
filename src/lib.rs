//! A concurrent, append-at-head singly linked list with multi-version
//! visibility and hazard-pointer based reclamation.
//!
//! Every insert and logical remove draws a transaction id from a per-list
//! commit counter; iterations and queries capture the counter once and see
//! exactly the versions visible at that snapshot (a node is visible at
//! snapshot `S` iff it was inserted strictly before `S` and not removed at
//! or before `S`). Removal is two-phased: [`List::remove`] only marks a
//! node, [`List::reclaim`] later unlinks marked nodes that no active
//! snapshot can still see and frees them once no hazard pointer covers
//! them.
//!
//! Threads participate through a [`Domain`], the shared registry of
//! per-thread hazard cells, announced snapshots and retired nodes. Any
//! number of lists may share one domain.
//!
//! ```
//! use std::ptr::NonNull;
//! use std::sync::Arc;
//!
//! use mvlist::{Domain, List};
//!
//! unsafe fn free_elem(elem: *mut ()) {
//!     drop(Box::from_raw(elem as *mut u64));
//! }
//!
//! let domain = Arc::new(Domain::new());
//! domain.register().unwrap();
//!
//! let list = List::new(Arc::clone(&domain));
//! let elem = Box::into_raw(Box::new(42_u64));
//! list.insert_head(NonNull::new(elem).unwrap()).unwrap();
//!
//! let mut iter = list.iter().unwrap();
//! assert_eq!(iter.next(), NonNull::new(elem));
//! assert_eq!(iter.next(), None);
//! drop(iter);
//!
//! list.remove(NonNull::new(elem).unwrap()).unwrap();
//! list.reclaim(Some(free_elem));
//!
//! drop(list);
//! domain.unregister();
//! ```
#![warn(missing_docs)]

use core::fmt;

pub use crate::domain::Domain;
pub use crate::iter::Iter;
pub use crate::list::List;

mod domain;
mod iter;
mod list;
mod local;
mod node;
mod ptr;
mod sync;

/// Destructor callback for element handles, invoked exactly once per
/// element whose node the core physically frees.
///
/// The handle is passed type-erased, exactly as it was stored. When lists
/// with different element types share a [`Domain`], a destructor passed to
/// [`List::reclaim`] may receive elements retired from any of them and
/// must be prepared for that (or the domain should be kept homogeneous).
///
/// The callback must not re-enter the list the element came from, nor call
/// any [`Domain`] function.
pub type Destructor = unsafe fn(*mut ());

////////////////////////////////////////////////////////////////////////////////////////////////////
// Error
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Operation failures. The discriminants are fixed and stable.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum Error {
    /// Node allocation failed; no state was changed.
    NoMem = -1,
    /// The element is not in the list (or not visible).
    NotFound = -2,
    /// The calling thread is not registered with the list's domain.
    NoThread = -3,
    /// Invalid request, e.g. a second iteration on a thread that already
    /// has one in flight.
    Inval = -4,
}

/***** impl inherent ******************************************************************************/

impl Error {
    /// The error's stable integer code.
    pub fn code(self) -> i32 {
        self as i32
    }
}

/***** impl Display/Error *************************************************************************/

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NoMem => "memory allocation failed",
            Error::NotFound => "element not found",
            Error::NoThread => "thread not registered with domain",
            Error::Inval => "invalid argument",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
