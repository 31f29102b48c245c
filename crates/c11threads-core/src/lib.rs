//! # c11threads-core
//!
//! Safe Rust logic for a C11 `<threads.h>` compatibility layer built on top of
//! a platform thread library that lacks one.
//!
//! Nothing in this crate touches a native primitive. It holds the pieces that
//! can be reasoned about without one: deadline arithmetic, the timed-lock
//! polling planner, mutex kind validation, the result-code vocabulary, error
//! types, configuration and structured diagnostics. The `c11threads-abi`
//! crate drives these against `libc`.

#![deny(unsafe_code)]

pub mod config;
pub mod diag;
pub mod error;
pub mod mutex;
pub mod status;
pub mod time;
pub mod timed_lock;

pub use config::{TimedLockConfig, TimedLockStrategy};
pub use diag::{Diagnostic, DiagnosticSink, Level};
pub use error::ThreadError;
pub use mutex::MutexKind;
pub use status::{LockOutcome, ThrdStatus, WaitOutcome};
pub use time::{ClockError, TimePoint, TimeSpan};
