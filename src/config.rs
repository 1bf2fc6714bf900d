//! Tunable constants.
//!
//! The spec is explicit that several constants here are "implementation
//! choices, not protocol requirements": `KICK_READER_LOOPS`, the wait-free
//! queue's adaptive-wait parameters, and the real-time signal number. They
//! are collected here instead of being baked in as `const`s so a caller
//! running under, say, a hypervisor with sluggish signal delivery can widen
//! the fence resend window without forking the crate.

use std::time::Duration;

/// Process-wide tunables for the RCU core and wait-free queue.
///
/// Installed once via [`crate::init_with_config`]; read-only for the rest
/// of the process's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Iterations of `cpu_relax` between forced single-reader fences while
    /// waiting for quiescence, on targets built with the `incoherent_cache`
    /// feature. Unused in the default cache-coherent polling loop.
    pub kick_reader_loops: u32,

    /// Spin iterations the wait-free queue's dequeue attempts before
    /// falling back to sleeping, while waiting for an in-flight enqueue to
    /// publish its node.
    pub wfq_adapt_attempts: u32,

    /// Sleep duration between adaptive-wait spin bursts in
    /// `wfq_dequeue_blocking`.
    pub wfq_wait: Duration,

    /// Sleep duration between polls of a reader's `need_fence` flag while
    /// the writer waits for the reader's signal handler to run.
    pub fence_poll_interval: Duration,

    /// How long the writer waits for a reader to clear `need_fence` before
    /// concluding the signal was lost and resending it.
    pub fence_resend_window: Duration,

    /// Real-time signal number used to force a reader to execute a memory
    /// fence. Must not collide with a signal the host application uses.
    /// Ignored when built with the `debug_full_mb` feature, since that mode
    /// never installs a signal handler.
    pub fence_signal: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kick_reader_loops: 10_000,
            wfq_adapt_attempts: 10,
            wfq_wait: Duration::from_millis(10),
            fence_poll_interval: Duration::from_millis(1),
            fence_resend_window: Duration::from_millis(10),
            fence_signal: default_fence_signal(),
        }
    }
}

/// `SIGRTMIN() + 0`: the lowest real-time signal, reserved by this crate
/// for the fence-forcing protocol. Document any change away from this
/// default alongside whatever other real-time signals the host process
/// uses, per the spec's requirement that the signal number be a real,
/// documented choice rather than a guess.
fn default_fence_signal() -> i32 {
    unsafe { libc::SIGRTMIN() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_suggested_values() {
        let cfg = Config::default();
        assert_eq!(cfg.kick_reader_loops, 10_000);
        assert_eq!(cfg.wfq_adapt_attempts, 10);
        assert_eq!(cfg.wfq_wait, Duration::from_millis(10));
        assert_eq!(cfg.fence_poll_interval, Duration::from_millis(1));
        assert_eq!(cfg.fence_resend_window, Duration::from_millis(10));
    }

    #[test]
    fn fence_signal_is_a_realtime_signal() {
        let cfg = Config::default();
        unsafe {
            assert!(cfg.fence_signal >= libc::SIGRTMIN() && cfg.fence_signal <= libc::SIGRTMAX());
        }
    }
}
