//! Cross-thread fence-forcing protocol.
//!
//! `read_lock`/`read_unlock`'s fast path only issues a compiler barrier, not
//! a hardware fence — on any architecture where that distinction matters,
//! the writer has to force one by some other means before it can trust that
//! a reader's store to `active` is actually visible. This module is that
//! "other means": it installs a real-time signal handler once per process,
//! then the writer asks a specific reader to execute one by setting its
//! `need_fence` flag and sending it the signal.
//!
//! Ported in spirit from `force_mb_all_threads`/`sigurcu_handler` in
//! `original_source/urcu.c`. Absent entirely when built with the
//! `debug_full_mb` feature, whose reader fast path emits full fences inline
//! instead and has no use for a signal-delivered one.

#![cfg_attr(feature = "debug_full_mb", allow(dead_code))]

use std::sync::Once;
use std::time::Duration;

use crate::config::Config;
use crate::error::{fatal, Error};
use crate::local;
use crate::pr;
use crate::registry::Entry;

static INSTALL: Once = Once::new();

/// Install the fence-protocol signal handler, once per process.
///
/// Idempotent: safe to call from every `init()`/`register_reader()` path,
/// matching the spec's requirement that process-level initialization be
/// idempotent and safe under the registry mutex.
#[cfg(not(feature = "debug_full_mb"))]
pub(crate) fn install(cfg: &Config) {
    INSTALL.call_once(|| unsafe {
        let mut act: libc::sigaction = std::mem::zeroed();
        act.sa_sigaction = sigurcu_handler as usize;
        act.sa_flags = libc::SA_SIGINFO;
        libc::sigemptyset(&mut act.sa_mask);
        let ret = libc::sigaction(cfg.fence_signal, &act, std::ptr::null_mut());
        if ret != 0 {
            fatal(Error::SignalHandler {
                signal: cfg.fence_signal,
                errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(-1),
            });
        }
        log::debug!(
            "urcu-rs: installed fence signal handler on signal {}",
            cfg.fence_signal
        );
    });
}

#[cfg(feature = "debug_full_mb")]
pub(crate) fn install(_cfg: &Config) {}

/// Remove the fence-protocol signal handler, asserting this library still
/// owns the disposition before touching it (mirrors `urcu_exit`'s
/// `assert(act.sa_sigaction == sigurcu_handler)`).
#[cfg(not(feature = "debug_full_mb"))]
pub(crate) fn uninstall(cfg: &Config) {
    unsafe {
        let mut old: libc::sigaction = std::mem::zeroed();
        let ret = libc::sigaction(cfg.fence_signal, std::ptr::null(), &mut old);
        if ret != 0 {
            fatal(Error::SignalHandler {
                signal: cfg.fence_signal,
                errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(-1),
            });
        }
        if old.sa_sigaction != sigurcu_handler as usize {
            log::warn!(
                "urcu-rs: fence signal {} was reassigned by another component; leaving it alone",
                cfg.fence_signal
            );
            return;
        }
        let mut dfl: libc::sigaction = std::mem::zeroed();
        dfl.sa_sigaction = libc::SIG_DFL;
        let ret = libc::sigaction(cfg.fence_signal, &dfl, std::ptr::null_mut());
        if ret != 0 {
            fatal(Error::SignalHandler {
                signal: cfg.fence_signal,
                errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(-1),
            });
        }
    }
}

#[cfg(feature = "debug_full_mb")]
pub(crate) fn uninstall(_cfg: &Config) {}

/// Executed on the interrupted reader thread. The only purpose of this
/// handler is to promote the reader's compiler barrier into a real memory
/// fence, exactly once, on demand.
#[cfg(not(feature = "debug_full_mb"))]
extern "C" fn sigurcu_handler(_signo: libc::c_int, _info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    pr::fence_memory();
    local::clear_need_fence_on_current_thread();
    pr::fence_memory();
}

/// Force every registered reader to execute a full memory fence at least
/// once, blocking until all have done so (or, in the `debug_full_mb`
/// build, doing nothing — the reader fast path already fenced inline).
#[cfg(not(feature = "debug_full_mb"))]
pub(crate) fn force_fence_all_readers(entries: &[Entry], cfg: &Config) {
    if entries.is_empty() {
        return;
    }
    for entry in entries {
        entry.need_fence().store(true, std::sync::atomic::Ordering::Relaxed);
    }
    // Ensure need_fence is visible to the target before the signal arrives.
    pr::fence_memory();
    for entry in entries {
        send_signal(entry.tid(), cfg.fence_signal);
    }
    for entry in entries {
        wait_for_reader(entry, cfg);
    }
    pr::fence_memory();
}

#[cfg(feature = "debug_full_mb")]
pub(crate) fn force_fence_all_readers(_entries: &[Entry], _cfg: &Config) {
    pr::fence_memory();
}

/// Force a single reader to execute a fence. Used by the incoherent-cache
/// quiescence poll to periodically kick a slow-to-commit reader.
#[cfg(not(feature = "debug_full_mb"))]
#[cfg_attr(not(feature = "incoherent_cache"), allow(dead_code))]
pub(crate) fn force_fence_one_reader(entry: &Entry, cfg: &Config) {
    entry.need_fence().store(true, std::sync::atomic::Ordering::Relaxed);
    pr::fence_memory();
    send_signal(entry.tid(), cfg.fence_signal);
    wait_for_reader(entry, cfg);
}

#[cfg(feature = "debug_full_mb")]
#[cfg_attr(not(feature = "incoherent_cache"), allow(dead_code))]
pub(crate) fn force_fence_one_reader(_entry: &Entry, _cfg: &Config) {
    pr::fence_memory();
}

#[cfg(not(feature = "debug_full_mb"))]
fn wait_for_reader(entry: &Entry, cfg: &Config) {
    let mut waited = Duration::ZERO;
    while entry.need_fence().load(std::sync::atomic::Ordering::Relaxed) {
        std::thread::sleep(cfg.fence_poll_interval);
        waited += cfg.fence_poll_interval;
        if waited >= cfg.fence_resend_window {
            log::warn!(
                "urcu-rs: reader {:#x} has not cleared need_fence after {:?}, resending signal",
                entry.tid() as usize,
                cfg.fence_resend_window
            );
            send_signal(entry.tid(), cfg.fence_signal);
            waited = Duration::ZERO;
        }
    }
}

#[cfg(not(feature = "debug_full_mb"))]
fn send_signal(tid: libc::pthread_t, signal: i32) {
    let ret = unsafe { libc::pthread_kill(tid, signal) };
    if ret != 0 && ret != libc::ESRCH {
        fatal(Error::SignalSend { errno: ret });
    }
}

#[cfg(all(test, not(feature = "debug_full_mb")))]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn force_fence_all_readers_is_a_noop_on_empty_registry() {
        let cfg = Config::default();
        force_fence_all_readers(&[], &cfg);
    }

    #[test]
    fn install_is_idempotent() {
        let cfg = Config::default();
        install(&cfg);
        install(&cfg);
    }
}
