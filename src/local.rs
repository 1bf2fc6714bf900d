//! Per-reader thread-local state.
//!
//! `active` and `need_fence` are `__thread` variables in the C original:
//! storage is thread-local, but both the owning thread and the writer (via
//! a pointer captured at registration) read and write them with explicit
//! atomic ordering. `std::thread_local!` gives the same storage shape; we
//! hand out raw pointers to the cells at `register_reader` time and rely on
//! the caller's contract (deregister before the thread exits) for those
//! pointers to stay valid for as long as the registry holds them.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};

/// A reader's grace-period snapshot and fence-pending flag, plus a local
/// flag tracking whether this thread is currently registered (used to give
/// a clean diagnostic instead of relying solely on the registry's own
/// check).
pub(crate) struct ReaderCell {
    pub(crate) active: AtomicIsize,
    pub(crate) need_fence: AtomicBool,
    pub(crate) registered: Cell<bool>,
}

thread_local! {
    pub(crate) static READER: ReaderCell = ReaderCell {
        active: AtomicIsize::new(0),
        need_fence: AtomicBool::new(false),
        registered: Cell::new(false),
    };
}

/// Raw, stable-for-the-thread's-lifetime pointers into this thread's
/// `ReaderCell`. Used to populate a registry entry.
pub(crate) fn cell_pointers() -> (*const AtomicIsize, *const AtomicBool) {
    READER.with(|cell| {
        (
            &cell.active as *const AtomicIsize,
            &cell.need_fence as *const AtomicBool,
        )
    })
}

/// Whether the current thread believes itself registered.
pub(crate) fn is_registered() -> bool {
    READER.with(|cell| cell.registered.get())
}

/// Mark the current thread registered or deregistered.
pub(crate) fn set_registered(value: bool) {
    READER.with(|cell| cell.registered.set(value));
}

/// Executed from the signal handler on the interrupted thread: clear this
/// thread's `need_fence` flag after the surrounding fences have run.
pub(crate) fn clear_need_fence_on_current_thread() {
    READER.with(|cell| cell.need_fence.store(false, Ordering::Relaxed));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_thread_is_not_registered() {
        std::thread::spawn(|| {
            assert!(!is_registered());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn cell_pointers_are_stable_within_a_thread() {
        let (a1, f1) = cell_pointers();
        let (a2, f2) = cell_pointers();
        assert_eq!(a1, a2);
        assert_eq!(f1, f2);
    }
}
