//! Switchable synchronization primitives.
//!
//! All atomics and thread-locals used by the core are imported through this
//! module, so the crate can be compiled against [`loom`]'s checked versions
//! with `RUSTFLAGS="--cfg loom"`.

#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};

#[cfg(not(loom))]
pub(crate) use std::thread_local;

#[cfg(loom)]
pub(crate) use loom::thread_local;

/// Busy-wait hint for the short spin on the domain resize latch.
#[cfg(not(loom))]
#[inline]
pub(crate) fn spin_loop() {
    std::hint::spin_loop();
}

#[cfg(loom)]
pub(crate) fn spin_loop() {
    loom::thread::yield_now();
}
