//! Reader registry.
//!
//! A flat, growth-only collection of per-reader records. Readers are
//! registered once (usually at thread start) and deregistered once (usually
//! at thread end); the registry mutex also doubles as the writer's "only one
//! `synchronize_rcu` at a time" lock, exactly as `internal_urcu_lock` does
//! in the C original — the whole grace-period algorithm, including the
//! fence-forcing passes, runs with this lock held.

use std::sync::atomic::{AtomicBool, AtomicIsize};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{fatal, Error, ThreadTag};

/// A single registered reader.
///
/// `active` and `need_fence` point at thread-local cells owned by the
/// registering thread. They stay valid for as long as the entry remains in
/// the registry, which requires the reader to deregister before its thread
/// exits — the registry performs no reclamation of its own for a thread
/// that simply disappears (see the spec's Non-goals).
pub(crate) struct Entry {
    tid: libc::pthread_t,
    active: *const AtomicIsize,
    need_fence: *const AtomicBool,
}

// SAFETY: `Entry` is only ever read while the registry mutex is held, and
// the pointers it carries are to `AtomicBool`/`AtomicIsize` cells, which are
// themselves `Sync`. The registering thread never moves out of the registry.
unsafe impl Send for Entry {}

impl Entry {
    /// The reader's OS thread handle, used to target fence signals.
    #[inline]
    pub(crate) fn tid(&self) -> libc::pthread_t {
        self.tid
    }

    /// The reader's thread-local grace-period snapshot.
    ///
    /// # Safety
    /// Caller must hold the registry mutex so the owning thread cannot be
    /// in the middle of deregistering concurrently.
    #[inline]
    pub(crate) fn active(&self) -> &AtomicIsize {
        unsafe { &*self.active }
    }

    /// The reader's thread-local fence-pending flag.
    ///
    /// # Safety
    /// Same requirement as [`Entry::active`].
    #[inline]
    pub(crate) fn need_fence(&self) -> &AtomicBool {
        unsafe { &*self.need_fence }
    }
}

/// The process-wide reader registry.
pub(crate) struct Registry {
    entries: Mutex<Vec<Entry>>,
}

/// Initial registry capacity before the first growth; doubled on demand by
/// `register`'s own explicit `try_reserve`, which gives us the "grows by
/// doubling, never shrinks" policy the spec calls for, with an allocation
/// failure funneled through `fatal` instead of aborting via the global
/// allocator handler (mirroring the C original's checked `malloc`).
const INIT_CAPACITY: usize = 4;

impl Registry {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Acquire the registry mutex.
    ///
    /// This is also the writer's grace-period lock: `synchronize_rcu` holds
    /// this guard for its entire algorithm, matching `internal_urcu_lock`
    /// wrapping the whole of the original `synchronize_rcu`.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        let mut guard = self.entries.lock();
        if guard.capacity() == 0 {
            if guard.try_reserve_exact(INIT_CAPACITY).is_err() {
                fatal(Error::RegistryAllocation {
                    attempted_capacity: INIT_CAPACITY,
                });
            }
        }
        guard
    }

    /// Register the current thread as a reader.
    pub(crate) fn register(
        &self,
        tid: libc::pthread_t,
        active: *const AtomicIsize,
        need_fence: *const AtomicBool,
    ) {
        let mut guard = self.lock();
        if guard.iter().any(|e| e.tid == tid) {
            fatal(Error::AlreadyRegistered(ThreadTag(tid)));
        }
        if guard.len() == guard.capacity() {
            let additional = guard.capacity().max(INIT_CAPACITY);
            if guard.try_reserve(additional).is_err() {
                fatal(Error::RegistryAllocation {
                    attempted_capacity: guard.capacity() + additional,
                });
            }
        }
        guard.push(Entry {
            tid,
            active,
            need_fence,
        });
        log::trace!("urcu-rs: registered reader {:#x}", tid as usize);
    }

    /// Deregister the current thread.
    ///
    /// Removes the entry by swapping in the last entry and truncating, so
    /// the registry never shrinks its backing storage and iteration order
    /// is not preserved across calls.
    pub(crate) fn deregister(&self, tid: libc::pthread_t) {
        let mut guard = self.lock();
        match guard.iter().position(|e| e.tid == tid) {
            Some(pos) => {
                guard.swap_remove(pos);
                log::trace!("urcu-rs: deregistered reader {:#x}", tid as usize);
            }
            None => fatal(Error::NotRegistered(ThreadTag(tid))),
        }
    }
}
