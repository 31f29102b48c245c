//! C11 `<threads.h>` entry points.
//!
//! Every function returns one of the `thrd_*` codes. With the `export-c11`
//! feature the symbols are exported unmangled so C code can link against
//! them; without it they are ordinary Rust functions and the host libc's own
//! C11 symbols stay in charge.

#![allow(non_camel_case_types)]

use std::ffi::{c_int, c_void};

use c11threads_core::config;
use c11threads_core::diag::{self, Diagnostic, DiagnosticSink, Level};
use c11threads_core::{LockOutcome, ThreadError, WaitOutcome};

use crate::native;
use crate::thread::{self, Builder};
use crate::{cond, mutex};

pub use c11threads_core::mutex::{MTX_PLAIN, MTX_RECURSIVE, MTX_TIMED};
pub use c11threads_core::status::{THRD_BUSY, THRD_ERROR, THRD_NOMEM, THRD_SUCCESS, THRD_TIMEDOUT};

pub type mtx_t = libc::pthread_mutex_t;
pub type cnd_t = libc::pthread_cond_t;
pub type thrd_t = libc::pthread_t;
pub type thrd_start_t = Option<thread::StartRoutine>;

// ---------------------------------------------------------------------------
// Status mapping
// ---------------------------------------------------------------------------

#[inline]
fn status(result: Result<(), ThreadError>) -> c_int {
    match result {
        Ok(()) => THRD_SUCCESS,
        Err(err) => err.status().as_raw(),
    }
}

#[inline]
fn lock_status(result: Result<LockOutcome, ThreadError>) -> c_int {
    match result {
        Ok(outcome) => outcome.status().as_raw(),
        Err(err) => err.status().as_raw(),
    }
}

#[inline]
fn wait_status(result: Result<WaitOutcome, ThreadError>) -> c_int {
    match result {
        Ok(outcome) => outcome.status().as_raw(),
        Err(err) => err.status().as_raw(),
    }
}

fn null_argument(sink: &dyn DiagnosticSink, component: &'static str, operation: &'static str) -> c_int {
    sink.report(&Diagnostic::anomaly(
        Level::Error,
        component,
        operation,
        "null pointer argument",
    ));
    THRD_ERROR
}

/// Reads a C deadline, reporting one that is not normalized.
///
/// # Safety
///
/// `ts` must be non-null and readable.
unsafe fn read_deadline(
    ts: *const libc::timespec,
    sink: &dyn DiagnosticSink,
    component: &'static str,
    operation: &'static str,
) -> Result<c11threads_core::TimePoint, ThreadError> {
    // SAFETY: forwarded caller contract.
    native::timespec_to_point(unsafe { &*ts }).map_err(|err| {
        sink.report(&Diagnostic::anomaly(Level::Error, component, operation, err.to_string()));
        ThreadError::from(err)
    })
}

// ---------------------------------------------------------------------------
// Mutexes
// ---------------------------------------------------------------------------

/// C11 `mtx_init`.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn mtx_init(mtx: *mut mtx_t, ty: c_int) -> c_int {
    let sink = diag::default_sink();
    if mtx.is_null() {
        return null_argument(&*sink, "mutex", "mtx_init");
    }
    let kind = match mutex::kind_from_flags(ty, &*sink) {
        Ok(kind) => kind,
        Err(err) => return err.status().as_raw(),
    };
    // SAFETY: caller provides storage for a mutex.
    status(unsafe { mutex::init_raw(mtx, kind, &*sink) })
}

/// C11 `mtx_destroy`.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn mtx_destroy(mtx: *mut mtx_t) {
    if mtx.is_null() {
        return;
    }
    // SAFETY: caller passes a mutex from `mtx_init` that nobody uses.
    unsafe { mutex::destroy_raw(mtx, &*diag::default_sink()) };
}

/// C11 `mtx_lock`.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn mtx_lock(mtx: *mut mtx_t) -> c_int {
    let sink = diag::default_sink();
    if mtx.is_null() {
        return null_argument(&*sink, "mutex", "mtx_lock");
    }
    // SAFETY: caller passes a mutex from `mtx_init`.
    status(unsafe { mutex::lock_raw(mtx, &*sink) })
}

/// C11 `mtx_trylock`.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn mtx_trylock(mtx: *mut mtx_t) -> c_int {
    let sink = diag::default_sink();
    if mtx.is_null() {
        return null_argument(&*sink, "mutex", "mtx_trylock");
    }
    // SAFETY: caller passes a mutex from `mtx_init`.
    lock_status(unsafe { mutex::try_lock_raw(mtx, &*sink) })
}

/// C11 `mtx_timedlock`: `ts` is an absolute `CLOCK_REALTIME` deadline.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn mtx_timedlock(mtx: *mut mtx_t, ts: *const libc::timespec) -> c_int {
    let sink = diag::default_sink();
    if mtx.is_null() || ts.is_null() {
        return null_argument(&*sink, "mutex", "mtx_timedlock");
    }
    // SAFETY: `ts` checked non-null.
    let deadline = match unsafe { read_deadline(ts, &*sink, "mutex", "mtx_timedlock") } {
        Ok(deadline) => deadline,
        Err(err) => return err.status().as_raw(),
    };
    let cfg = config::default_config();
    // SAFETY: caller passes a mutex from `mtx_init`.
    lock_status(unsafe { mutex::timed_lock_raw(mtx, deadline, &cfg, &*sink) })
}

/// C11 `mtx_unlock`.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn mtx_unlock(mtx: *mut mtx_t) -> c_int {
    let sink = diag::default_sink();
    if mtx.is_null() {
        return null_argument(&*sink, "mutex", "mtx_unlock");
    }
    // SAFETY: caller passes a mutex from `mtx_init`.
    status(unsafe { mutex::unlock_raw(mtx, &*sink) })
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

/// C11 `thrd_create`.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn thrd_create(thr: *mut thrd_t, func: thrd_start_t, arg: *mut c_void) -> c_int {
    let sink = diag::default_sink();
    let Some(func) = func else {
        return null_argument(&*sink, "thread", "thrd_create");
    };
    if thr.is_null() {
        return null_argument(&*sink, "thread", "thrd_create");
    }
    // SAFETY: C entry points cannot unwind; the caller vouches for `arg`.
    match unsafe { Builder::new().sink(sink).spawn_raw(func, arg) } {
        Ok(handle) => {
            // SAFETY: `thr` checked non-null.
            unsafe { *thr = handle.into_raw() };
            THRD_SUCCESS
        }
        Err(err) => err.status().as_raw(),
    }
}

/// C11 `thrd_join`. `res` may be null.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn thrd_join(thr: thrd_t, res: *mut c_int) -> c_int {
    let sink = diag::default_sink();
    // SAFETY: caller passes an unjoined thread from `thrd_create`.
    match unsafe { thread::join_raw(thr, &*sink) } {
        Ok(value) => {
            if !res.is_null() {
                // SAFETY: checked non-null.
                unsafe { *res = value };
            }
            THRD_SUCCESS
        }
        Err(err) => err.status().as_raw(),
    }
}

/// C11 `thrd_sleep`: 0 when the full duration elapsed, -1 when a signal
/// cut it short (the unslept part goes to `remaining` if non-null), other
/// negative values on error.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn thrd_sleep(duration: *const libc::timespec, remaining: *mut libc::timespec) -> c_int {
    if duration.is_null() {
        return -2;
    }
    // SAFETY: checked non-null.
    let Ok(span) = native::timespec_to_span(unsafe { &*duration }) else {
        return -2;
    };
    match native::sleep_span(span) {
        Ok(()) => 0,
        Err(ThreadError::Interrupted { remaining: left }) => {
            if !remaining.is_null() {
                let Ok(left) = native::span_to_timespec(left) else {
                    return -2;
                };
                // SAFETY: checked non-null.
                unsafe { *remaining = left };
            }
            -1
        }
        Err(_) => -2,
    }
}

/// C11 `thrd_yield`.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn thrd_yield() {
    native::yield_now();
}

/// C11 `thrd_current`.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn thrd_current() -> thrd_t {
    thread::current().as_raw()
}

/// C11 `thrd_equal`: non-zero when both name the same thread.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn thrd_equal(a: thrd_t, b: thrd_t) -> c_int {
    c_int::from(thread::ThreadId::from_raw(a) == thread::ThreadId::from_raw(b))
}

// ---------------------------------------------------------------------------
// Condition variables
// ---------------------------------------------------------------------------

/// C11 `cnd_init`.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn cnd_init(cond: *mut cnd_t) -> c_int {
    let sink = diag::default_sink();
    if cond.is_null() {
        return null_argument(&*sink, "cond", "cnd_init");
    }
    // SAFETY: caller provides storage for a condition variable.
    status(unsafe { cond::init_raw(cond, &*sink) })
}

/// C11 `cnd_destroy`.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn cnd_destroy(cond: *mut cnd_t) {
    if cond.is_null() {
        return;
    }
    // SAFETY: caller passes a condition variable from `cnd_init` with no waiters.
    unsafe { cond::destroy_raw(cond, &*diag::default_sink()) };
}

/// C11 `cnd_wait`.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn cnd_wait(cond: *mut cnd_t, mtx: *mut mtx_t) -> c_int {
    let sink = diag::default_sink();
    if cond.is_null() || mtx.is_null() {
        return null_argument(&*sink, "cond", "cnd_wait");
    }
    // SAFETY: caller passes initialized objects and holds `mtx`.
    status(unsafe { cond::wait_raw(cond, mtx, &*sink) })
}

/// C11 `cnd_timedwait`: `ts` is an absolute `CLOCK_REALTIME` deadline.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn cnd_timedwait(
    cond: *mut cnd_t,
    mtx: *mut mtx_t,
    ts: *const libc::timespec,
) -> c_int {
    let sink = diag::default_sink();
    if cond.is_null() || mtx.is_null() || ts.is_null() {
        return null_argument(&*sink, "cond", "cnd_timedwait");
    }
    // SAFETY: `ts` checked non-null.
    let deadline = match unsafe { read_deadline(ts, &*sink, "cond", "cnd_timedwait") } {
        Ok(deadline) => deadline,
        Err(err) => return err.status().as_raw(),
    };
    // SAFETY: caller passes initialized objects and holds `mtx`.
    wait_status(unsafe { cond::timed_wait_raw(cond, mtx, deadline, &*sink) })
}

/// C11 `cnd_signal`.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn cnd_signal(cond: *mut cnd_t) -> c_int {
    let sink = diag::default_sink();
    if cond.is_null() {
        return null_argument(&*sink, "cond", "cnd_signal");
    }
    // SAFETY: caller passes a condition variable from `cnd_init`.
    status(unsafe { cond::signal_raw(cond, &*sink) })
}

/// C11 `cnd_broadcast`.
#[cfg_attr(feature = "export-c11", unsafe(no_mangle))]
pub unsafe extern "C" fn cnd_broadcast(cond: *mut cnd_t) -> c_int {
    let sink = diag::default_sink();
    if cond.is_null() {
        return null_argument(&*sink, "cond", "cnd_broadcast");
    }
    // SAFETY: caller passes a condition variable from `cnd_init`.
    status(unsafe { cond::broadcast_raw(cond, &*sink) })
}
