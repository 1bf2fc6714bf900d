//! Atomic primitives and memory barriers.
//!
//! This module provides the small set of portable atomic operations and
//! memory barriers the grace-period engine and wait-free queue are built
//! from. It wraps `core::sync::atomic` rather than reaching for inline
//! assembly, which keeps the library portable across the architectures
//! `core::sync::atomic` already supports.
//!
//! # Memory Ordering
//!
//! - [`barrier`]: Compiler barrier only (no hardware fence) — this is what
//!   `read_lock`/`read_unlock` use on their fast path; the hardware fence
//!   they still need is delivered asynchronously by the signal-based fence
//!   protocol (see [`crate::fence`]).
//! - [`fence_acquire`] / [`fence_release`] / [`fence_acqrel`]: the named
//!   orderings.
//! - [`fence_memory`]: a full sequentially-consistent fence, used at the
//!   points `synchronize_rcu` calls out as "not strictly required by the
//!   proof, but materially aids auditing".
//!
//! # Progress Guarantees
//!
//! - **Wait-free**: load, store, fence, stall.
//! - **Lock-free**: compare-and-swap, exchange.

use core::sync::atomic::{compiler_fence, fence, AtomicIsize, AtomicPtr, Ordering};

/// Compiler barrier - prevents compiler reordering, no hardware fence.
///
/// Used on the reader fast path: it keeps the compiler from hoisting reads
/// of RCU-protected data above the `active` store, without paying for a
/// hardware fence on every lock/unlock.
#[inline(always)]
pub fn barrier() {
    compiler_fence(Ordering::SeqCst);
}

/// Acquire fence.
#[inline(always)]
pub fn fence_acquire() {
    fence(Ordering::Acquire);
}

/// Release fence.
#[inline(always)]
pub fn fence_release() {
    fence(Ordering::Release);
}

/// Acquire-release fence.
#[inline(always)]
pub fn fence_acqrel() {
    fence(Ordering::AcqRel);
}

/// Full memory fence - sequentially consistent ordering.
#[inline(always)]
pub fn fence_memory() {
    fence(Ordering::SeqCst);
}

/// CPU pause hint for spin loops.
///
/// Reduces power consumption and contention in the quiescence poll and the
/// wait-free queue's adaptive dequeue wait.
#[inline(always)]
pub fn stall() {
    core::hint::spin_loop();
}

/// Atomic operations on the signed word used for the global grace-period
/// counter and each reader's thread-local snapshot of it.
pub mod word {
    use super::*;

    /// Atomic load with acquire semantics.
    #[inline]
    pub fn load(target: &AtomicIsize) -> isize {
        target.load(Ordering::Acquire)
    }

    /// Atomic load with relaxed semantics.
    #[inline]
    pub fn load_relaxed(target: &AtomicIsize) -> isize {
        target.load(Ordering::Relaxed)
    }

    /// Atomic store with release semantics.
    #[inline]
    pub fn store(target: &AtomicIsize, value: isize) {
        target.store(value, Ordering::Release);
    }

    /// Atomic store with relaxed semantics.
    #[inline]
    pub fn store_relaxed(target: &AtomicIsize, value: isize) {
        target.store(value, Ordering::Relaxed);
    }

    /// Atomic exchange. Returns previous value.
    #[inline]
    pub fn xchg(target: &AtomicIsize, value: isize) -> isize {
        target.swap(value, Ordering::SeqCst)
    }
}

/// Pointer atomic operations.
pub mod ptr_ops {
    use super::*;

    /// Atomic load of pointer with acquire semantics.
    ///
    /// This is the ordering `dereference` needs: consume/acquire so that
    /// loads of the pointee, which happen after this call returns, cannot
    /// be hoisted above it.
    #[inline]
    pub fn load<T>(target: &AtomicPtr<T>) -> *mut T {
        target.load(Ordering::Acquire)
    }

    /// Atomic store of pointer with release semantics.
    #[inline]
    pub fn store<T>(target: &AtomicPtr<T>, value: *mut T) {
        target.store(value, Ordering::Release);
    }

    /// Atomic exchange of pointer with sequentially-consistent ordering.
    ///
    /// Returns the previous value. Used by `xchg_pointer` and as the
    /// linearization point of the wait-free queue's enqueue.
    #[inline]
    pub fn xchg<T>(target: &AtomicPtr<T>, value: *mut T) -> *mut T {
        target.swap(value, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr;

    #[test]
    fn word_load_store_roundtrip() {
        let var = AtomicIsize::new(0);
        word::store(&var, -7);
        assert_eq!(word::load(&var), -7);
    }

    #[test]
    fn word_xchg_returns_previous() {
        let var = AtomicIsize::new(42);
        let old = word::xchg(&var, 99);
        assert_eq!(old, 42);
        assert_eq!(word::load(&var), 99);
    }

    #[test]
    fn ptr_ops_roundtrip() {
        let mut obj1: u64 = 1;
        let mut obj2: u64 = 2;
        let p = AtomicPtr::new(ptr::null_mut());

        ptr_ops::store(&p, &mut obj1 as *mut u64);
        let old = ptr_ops::xchg(&p, &mut obj2 as *mut u64);

        assert_eq!(old, &mut obj1 as *mut u64);
        assert_eq!(ptr_ops::load(&p), &mut obj2 as *mut u64);
    }

    #[test]
    fn fences_and_stall_do_not_panic() {
        barrier();
        fence_acquire();
        fence_release();
        fence_acqrel();
        fence_memory();
        stall();
    }
}
