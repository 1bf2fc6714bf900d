//! Error conditions and the fatal-abort path.
//!
//! Every condition this crate can detect before a reader/writer protocol
//! invariant would otherwise be violated is represented here. None of them
//! are recoverable in the sense of "try again and it might work" — they
//! indicate a host-level programming bug (double registration, an
//! unregistered deregister, OS resource exhaustion) — so the only consumer
//! of [`Error`] is [`fatal`], which logs and aborts the process. The type
//! still gets a proper `Display`/`std::error::Error` impl via `thiserror`
//! so the diagnostic a caller sees on the way down is readable.

use std::fmt;

/// A fatal condition detected by the RCU core or the wait-free queue.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// `register_reader()` was called twice on the same thread without an
    /// intervening `unregister_reader()`.
    #[error("thread {0:?} is already registered as an RCU reader")]
    AlreadyRegistered(ThreadTag),

    /// `unregister_reader()` was called on a thread with no registry entry.
    #[error("thread {0:?} attempted to unregister without a registry entry")]
    NotRegistered(ThreadTag),

    /// The registry could not grow to accommodate a new reader.
    #[error("failed to grow the reader registry to {attempted_capacity} entries")]
    RegistryAllocation {
        /// The capacity the registry attempted to grow to.
        attempted_capacity: usize,
    },

    /// Installing or removing the fence-protocol signal handler failed.
    #[error("sigaction({signal}) failed: {errno}")]
    SignalHandler {
        /// The signal number the installation attempt used.
        signal: i32,
        /// The `errno` value reported by `sigaction`.
        errno: i32,
    },

    /// A signal send to a registered reader failed for a reason other than
    /// "no such thread" (which is treated as racing with thread exit and is
    /// not itself fatal at the call site that notices it).
    #[error("pthread_kill failed with errno {errno}")]
    SignalSend {
        /// The `errno` value reported by the failed send.
        errno: i32,
    },
}

/// Opaque tag identifying a thread in diagnostics, without requiring the
/// caller to depend on a particular OS thread-id representation.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ThreadTag(pub libc::pthread_t);

impl fmt::Debug for ThreadTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0 as usize)
    }
}

/// Log `err` at error level and abort the process.
///
/// All of this crate's error conditions are invariant violations the reader
/// fast path has no way to check for cheaply; by the time one is detected,
/// continuing would mean running a grace period whose correctness can no
/// longer be argued. `abort` (rather than `exit`) keeps the process's normal
/// crash-reporting path intact.
pub fn fatal(err: Error) -> ! {
    log::error!("urcu-rs: fatal error: {err}");
    std::process::abort();
}
