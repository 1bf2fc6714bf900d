//! Grace-period engine.
//!
//! The global grace-period counter, the reader fast path (`read_lock` /
//! `read_unlock`), and the writer-side `synchronize_rcu` algorithm that
//! flips the counter's parity twice and waits for readers to quiesce each
//! time. Ported in spirit from `synchronize_rcu`/`rcu_read_lock`/
//! `wait_for_quiescent_state` in `original_source/urcu.c`.

use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};

use crate::config::Config;
use crate::error::{fatal, Error, ThreadTag};
use crate::fence;
use crate::local;
use crate::pr;
use crate::registry::{Entry, Registry};

/// Parity bit: the sign bit of the word-sized counter. Placed as far as
/// possible from the low nested-count bits so no realistic nesting depth
/// can ever collide with it, matching the original's `RCU_GP_CTR_BIT`.
const PARITY_BIT: isize = isize::MIN;

/// All bits except `PARITY_BIT`: masks the nested-reader-count part of the
/// counter, the original's `RCU_GP_CTR_NEST_MASK`.
const NEST_MASK: isize = !PARITY_BIT;

/// Unit added per nesting level, and the bias pre-applied to `G` so a
/// reader's very first snapshot of it is non-zero (`RCU_GP_COUNT`).
const GP_COUNT: isize = 1;

static GLOBAL_GP: AtomicIsize = AtomicIsize::new(GP_COUNT);

pub(crate) static REGISTRY: Registry = Registry::new();

/// Register the current thread as an RCU reader.
///
/// Idempotent per the library's process-level init, but calling this twice
/// on the same thread without an intervening [`unregister_reader`] is a
/// fatal usage error.
pub fn register_reader() {
    crate::ensure_init();
    let tid = unsafe { libc::pthread_self() };
    if local::is_registered() {
        fatal(Error::AlreadyRegistered(ThreadTag(tid)));
    }
    let (active, need_fence) = local::cell_pointers();
    REGISTRY.register(tid, active, need_fence);
    local::set_registered(true);
}

/// Deregister the current thread.
///
/// Fatal if the current thread was never registered. Must be called before
/// the thread exits — this library performs no reclamation of registry
/// entries for a thread that simply disappears.
pub fn unregister_reader() {
    let tid = unsafe { libc::pthread_self() };
    if !local::is_registered() {
        fatal(Error::NotRegistered(ThreadTag(tid)));
    }
    REGISTRY.deregister(tid);
    local::set_registered(false);
}

/// Enter a (possibly nested) read-side critical section. Never blocks,
/// never fails, and performs no atomic read-modify-write or hardware fence
/// in the default build (the ordering a reader's snapshot needs is instead
/// delivered asynchronously — see [`crate::fence`]).
#[cfg(not(feature = "debug_full_mb"))]
pub fn read_lock() {
    local::READER.with(|cell| {
        let tmp = cell.active.load(Ordering::Relaxed);
        if tmp & NEST_MASK == 0 {
            // Relaxed, not Acquire: a true hardware acquire fence here
            // would defeat the fast path's no-hardware-fence guarantee.
            // The ordering this snapshot needs is instead established by
            // the writer's cross-thread fence protocol before it trusts
            // this reader to have quiesced.
            let g = GLOBAL_GP.load(Ordering::Relaxed);
            cell.active.store(g, Ordering::Relaxed);
        } else {
            cell.active.store(tmp + GP_COUNT, Ordering::Relaxed);
        }
    });
    pr::barrier();
}

/// `DEBUG_FULL_MB` build: no signal-based fence protocol exists, so the
/// read side pays for full fences inline instead.
#[cfg(feature = "debug_full_mb")]
pub fn read_lock() {
    pr::fence_memory();
    local::READER.with(|cell| {
        let tmp = cell.active.load(Ordering::Relaxed);
        if tmp & NEST_MASK == 0 {
            let g = GLOBAL_GP.load(Ordering::Relaxed);
            cell.active.store(g, Ordering::Relaxed);
        } else {
            cell.active.store(tmp + GP_COUNT, Ordering::Relaxed);
        }
    });
    pr::fence_memory();
}

/// Exit a read-side critical section.
///
/// Only the outermost `read_unlock` sets `active` back to exactly zero;
/// nested exits just decrement the count component, matching the
/// original's `urcu_active_readers -= RCU_GP_COUNT` vs. `= 0` distinction
/// (subtracting alone would leave the parity bit set, which would make
/// `active` non-zero even though the reader has fully exited).
#[cfg(not(feature = "debug_full_mb"))]
pub fn read_unlock() {
    pr::barrier();
    local::READER.with(|cell| {
        let tmp = cell.active.load(Ordering::Relaxed);
        if tmp & NEST_MASK == GP_COUNT {
            cell.active.store(0, Ordering::Relaxed);
        } else {
            cell.active.store(tmp - GP_COUNT, Ordering::Relaxed);
        }
    });
}

#[cfg(feature = "debug_full_mb")]
pub fn read_unlock() {
    pr::fence_memory();
    local::READER.with(|cell| {
        let tmp = cell.active.load(Ordering::Relaxed);
        if tmp & NEST_MASK == GP_COUNT {
            cell.active.store(0, Ordering::Relaxed);
        } else {
            cell.active.store(tmp - GP_COUNT, Ordering::Relaxed);
        }
    });
    pr::fence_memory();
}

/// `true` iff a reader whose thread-local snapshot is `active` could still
/// be running a critical section that began under the *old* parity of `g`.
#[inline]
fn ongoing(active: isize, g: isize) -> bool {
    active != 0 && (active ^ g) & PARITY_BIT != 0
}

fn switch_parity() {
    let g = GLOBAL_GP.load(Ordering::Relaxed);
    GLOBAL_GP.store(g ^ PARITY_BIT, Ordering::Release);
    log::trace!("urcu-rs: grace-period parity flipped to {:#x}", g ^ PARITY_BIT);
}

/// Poll every registered reader until none are still running a critical
/// section from the parity just vacated.
fn wait_for_quiescence(entries: &[Entry], cfg: &Config) {
    let g = GLOBAL_GP.load(Ordering::Relaxed);
    for entry in entries {
        #[cfg(feature = "incoherent_cache")]
        {
            let mut loops = 0u32;
            while ongoing(entry.active().load(Ordering::Relaxed), g) {
                loops += 1;
                if loops >= cfg.kick_reader_loops {
                    fence::force_fence_one_reader(entry, cfg);
                    loops = 0;
                } else {
                    pr::stall();
                }
            }
        }
        #[cfg(not(feature = "incoherent_cache"))]
        {
            let _ = cfg;
            while ongoing(entry.active().load(Ordering::Relaxed), g) {
                pr::stall();
            }
        }
    }
}

/// Block until every pre-existing reader has exited its critical section at
/// least once.
///
/// Runs under the registry mutex for its entire duration — both to
/// serialize writers and because the algorithm must scan a single
/// consistent snapshot of the registry.
pub fn synchronize_rcu() {
    crate::ensure_init();
    let cfg = crate::current_config();
    let guard = REGISTRY.lock();

    log::debug!("urcu-rs: synchronize_rcu: begin ({} readers)", guard.len());

    fence::force_fence_all_readers(&guard, &cfg);

    switch_parity(); // 0 -> 1
    pr::fence_memory();
    wait_for_quiescence(&guard, &cfg);

    pr::fence_memory();
    switch_parity(); // 1 -> 0
    pr::fence_memory();
    wait_for_quiescence(&guard, &cfg);

    fence::force_fence_all_readers(&guard, &cfg);

    log::debug!("urcu-rs: synchronize_rcu: end");
}

/// Atomic consume-ordered load of an RCU-protected pointer.
///
/// The returned pointer is valid until the matching `read_unlock`.
pub fn dereference<T>(p: &AtomicPtr<T>) -> *mut T {
    pr::ptr_ops::load(p)
}

/// Release-ordered store of `v` into `*p`, with a preceding store fence so
/// any writes to the pointee are ordered before the publication becomes
/// visible.
pub fn assign_pointer<T>(p: &AtomicPtr<T>, v: *mut T) {
    pr::fence_release();
    pr::ptr_ops::store(p, v);
}

/// Atomic exchange of an RCU-protected pointer, with the same preceding
/// store fence as [`assign_pointer`]. Returns the previous value.
pub fn xchg_pointer<T>(p: &AtomicPtr<T>, v: *mut T) -> *mut T {
    pr::fence_release();
    pr::ptr_ops::xchg(p, v)
}

/// Publish `v` and block until it is safe to reclaim the value it replaced.
pub fn publish_and_wait<T>(p: &AtomicPtr<T>, v: *mut T) -> *mut T {
    let old = xchg_pointer(p, v);
    synchronize_rcu();
    old
}

/// Model-checked interleavings of the core parity-flip / quiescence-check
/// pattern, independent of the real thread-local/signal machinery (`loom`
/// supports neither), in the style of `codyps-local-rcu`'s loom tests.
#[cfg(feature = "loom")]
mod loom_tests {
    use loom::sync::atomic::{AtomicIsize, Ordering};
    use loom::thread;

    const PARITY_BIT: isize = isize::MIN;
    const GP_COUNT: isize = 1;

    fn ongoing(active: isize, g: isize) -> bool {
        active != 0 && (active ^ g) & PARITY_BIT != 0
    }

    #[test]
    fn reader_snapshot_always_matches_some_g_value_the_writer_saw() {
        loom::model(|| {
            let g = loom::sync::Arc::new(AtomicIsize::new(GP_COUNT));
            let reader_active = loom::sync::Arc::new(AtomicIsize::new(0));

            let g2 = g.clone();
            let active2 = reader_active.clone();
            let reader = thread::spawn(move || {
                let snapshot = g2.load(Ordering::Relaxed);
                active2.store(snapshot, Ordering::Relaxed);
                active2.store(0, Ordering::Relaxed);
            });

            let before = g.load(Ordering::Relaxed);
            g.store(before ^ PARITY_BIT, Ordering::Release);

            reader.join().unwrap();

            // After the flip, a reader that has fully exited always shows
            // `active == 0` to any observer — the writer's wait loop only
            // needs to check `ongoing`, never a partially-applied state.
            assert!(!ongoing(reader_active.load(Ordering::Relaxed), before ^ PARITY_BIT));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ongoing_is_false_for_inactive_reader() {
        assert!(!ongoing(0, GLOBAL_GP.load(Ordering::Relaxed)));
    }

    #[test]
    fn ongoing_is_true_only_across_a_parity_mismatch() {
        let g = GP_COUNT; // parity bit clear
        let matching = GP_COUNT; // same parity, still "active" by count
        let stale = GP_COUNT | PARITY_BIT; // opposite parity
        assert!(!ongoing(matching, g));
        assert!(ongoing(stale, g));
    }

    #[test]
    fn nested_read_lock_unlock_is_balanced() {
        local::READER.with(|cell| assert_eq!(cell.active.load(Ordering::Relaxed), 0));
        read_lock();
        read_lock();
        read_lock();
        local::READER.with(|cell| assert_ne!(cell.active.load(Ordering::Relaxed), 0));
        read_unlock();
        read_unlock();
        local::READER.with(|cell| assert_ne!(cell.active.load(Ordering::Relaxed), 0));
        read_unlock();
        local::READER.with(|cell| assert_eq!(cell.active.load(Ordering::Relaxed), 0));
    }

    #[test]
    fn synchronize_rcu_with_no_readers_is_prompt() {
        crate::ensure_init();
        synchronize_rcu();
    }

    #[test]
    fn register_then_unregister_round_trips() {
        crate::ensure_init();
        register_reader();
        assert!(local::is_registered());
        unregister_reader();
        assert!(!local::is_registered());
    }
}
