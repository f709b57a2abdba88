//! # Single-threaded reactor
//!
//! All protocol state (transactions, dialogs, caches) is owned by one
//! context value and mutated only from the thread running the loop. The
//! loop multiplexes three sources:
//!
//! - timers from a [`Scheduler`] (one-shot, counted or periodic, with
//!   cheap lazy cancellation)
//! - jobs marshaled from other threads through a [`ReactorHandle`]
//! - OS signals registered with [`EventLoop::register_signal`]
//!
//! Every callback runs under a panic guard; a panicking callback is logged
//! and the loop keeps going.
//!
//! ```text
//!   other threads ──schedule()──▶ job queue ─┐
//!   OS signals ─────────────────▶ sig queue ─┼──▶ EventLoop::run ──▶ &mut C
//!   Scheduler deadlines ─────────────────────┘
//! ```
//!
//! Tests drive the same machinery without a runtime: time is virtual
//! ([`Scheduler::advance`]) and [`EventLoop::run_pending`] drains queued
//! jobs synchronously.

mod event_loop;
mod scheduler;

pub use event_loop::{Driver, EventLoop, Job, ReactorHandle};
pub use scheduler::{Repeat, Scheduler, TimerHandle};

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

/// Run `f`, logging instead of unwinding if it panics
pub(crate) fn guarded<F: FnOnce()>(what: &str, f: F) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(panic) => {
            error!("unhandled panic when processing {}: {}", what, panic_message(&*panic));
            false
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
