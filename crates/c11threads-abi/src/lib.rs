#![allow(clippy::missing_safety_doc)]
//! # c11threads-abi
//!
//! C11 `<threads.h>` (`mtx_*`, `cnd_*`, `thrd_*`) on top of POSIX threads.
//!
//! ```text
//! C caller -> c11 entry (this crate) -> mutex / cond / thread -> libc pthread
//!                                          |
//!                                          +-> c11threads-core (deadlines,
//!                                              timed-lock planner, errors,
//!                                              diagnostics)
//! ```
//!
//! Rust callers use [`Mutex`], [`Condvar`] and [`thread::spawn`] directly.
//! Mutexes get a deadline-bounded lock even where the platform has none:
//! [`Mutex::timed_lock`] polls with a short, configurable check interval.

pub mod c11;
pub mod cond;
pub mod mutex;
pub mod native;
pub mod thread;

pub use cond::Condvar;
pub use mutex::Mutex;
pub use native::{deadline_after, now};
pub use thread::{Builder, ThreadHandle, ThreadId};
