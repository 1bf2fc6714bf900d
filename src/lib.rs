//! # urcu-rs
//!
//! A userspace read-copy-update primitive, plus a companion wait-free
//! multi-producer queue, ported in spirit from the
//! [userspace-rcu](https://liburcu.org/) C library.
//!
//! ## Module Organization
//!
//! ### Foundation
//! - [`pr`] - Atomic primitives and memory barriers
//! - [`error`] - Fatal error conditions and the abort path
//! - [`config`] - Process-wide tunables
//!
//! ### Grace-Period Engine
//! - [`local`] - Per-reader thread-local state
//! - [`registry`] - The process-wide reader registry (also the writer's lock)
//! - [`fence`] - The cross-thread fence-forcing signal protocol
//! - [`gpe`] - The reader fast path and `synchronize_rcu` itself
//!
//! ### Wait-Free Queue
//! - [`wfqueue`] - A wait-free-enqueue / blocking-dequeue MPSC queue
//!
//! ## Getting Started
//!
//! ```no_run
//! use urcu_rs::{read_lock, read_unlock, register_reader, synchronize_rcu, unregister_reader};
//!
//! register_reader();
//! read_lock();
//! // ... dereference RCU-protected pointers ...
//! read_unlock();
//! synchronize_rcu();
//! unregister_reader();
//! ```
//!
//! A reader must call [`register_reader`] before its first [`read_lock`] and
//! [`unregister_reader`] before the thread exits. Writers never register;
//! they call [`synchronize_rcu`] (or [`publish_and_wait`]) directly.

#[cfg(not(unix))]
compile_error!("urcu-rs relies on pthread_kill/sigaction for its fence protocol and only supports unix targets");

pub mod config;
pub mod error;
pub mod fence;
pub mod gpe;
pub mod local;
pub mod pr;
pub mod registry;
pub mod wfqueue;

use std::sync::OnceLock;

pub use config::Config;
pub use error::Error;
pub use gpe::{
    assign_pointer, dereference, publish_and_wait, read_lock, read_unlock, register_reader,
    synchronize_rcu, unregister_reader, xchg_pointer,
};
pub use wfqueue::{Queue, WfqNode};

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Initialize the library with default tunables.
///
/// Calling this is optional: every entry point that needs configuration
/// (`register_reader`, `synchronize_rcu`, ...) initializes it lazily on
/// first use. Call it explicitly only if you need [`init_with_config`]'s
/// non-default tunables to be in effect before any other call.
pub fn init() {
    init_with_config(Config::default());
}

/// Initialize the library with explicit tunables.
///
/// Must be called, if at all, before any reader registers or any writer
/// calls [`synchronize_rcu`] — configuration is fixed for the life of the
/// process once the first of those happens. A second call is logged and
/// ignored rather than silently reconfiguring a running system.
pub fn init_with_config(cfg: Config) {
    if CONFIG.set(cfg).is_err() {
        log::warn!(
            "urcu-rs: init_with_config called after the library was already initialized; ignoring"
        );
    }
    fence::install(&current_config());
}

/// Remove the fence-forcing signal handler installed by this library.
///
/// Intended for hosts that need to hand the signal back (e.g. before
/// installing their own handler on the same number), not for routine
/// shutdown — there is no requirement to call this before process exit.
pub fn shutdown() {
    fence::uninstall(&current_config());
}

pub(crate) fn current_config() -> Config {
    *CONFIG.get_or_init(Config::default)
}

pub(crate) fn ensure_init() {
    fence::install(&current_config());
}
