//! Mutexes over `pthread_mutex_t`.
//!
//! The raw functions work on caller-owned storage and back the `mtx_*`
//! surface. [`Mutex`] owns boxed storage (a pthread mutex must not move once
//! initialized) and exposes the same operations to Rust callers.
//!
//! Plain mutexes are created `PTHREAD_MUTEX_ERRORCHECK`, so relocking by the
//! holder and unlocking by a non-holder come back as errors instead of a
//! hang or silent corruption.

use std::cell::UnsafeCell;
use std::sync::Arc;

use c11threads_core::config::{self, TimedLockConfig, TimedLockStrategy};
use c11threads_core::diag::{self, Diagnostic, DiagnosticSink, Level};
use c11threads_core::timed_lock::{self, PollDriver, TryAcquire};
use c11threads_core::time::{TimePoint, TimeSpan};
use c11threads_core::{LockOutcome, MutexKind, ThreadError};

use crate::native::{self, report};

const COMPONENT: &str = "mutex";

// ---------------------------------------------------------------------------
// Attribute guard
// ---------------------------------------------------------------------------

/// Live `pthread_mutexattr_t`, destroyed on drop whatever path is taken out
/// of initialization.
struct MutexAttr<'a> {
    raw: libc::pthread_mutexattr_t,
    sink: &'a dyn DiagnosticSink,
}

impl<'a> MutexAttr<'a> {
    fn for_kind(kind: MutexKind, sink: &'a dyn DiagnosticSink) -> Result<Self, ThreadError> {
        let mut attr = MutexAttr {
            // SAFETY: plain data, overwritten by pthread_mutexattr_init below.
            raw: unsafe { std::mem::zeroed() },
            sink,
        };
        // SAFETY: `attr.raw` is valid storage.
        let rc = unsafe { libc::pthread_mutexattr_init(&mut attr.raw) };
        if rc != 0 {
            report(sink, Level::Error, COMPONENT, "pthread_mutexattr_init", rc);
            // Not initialized, so skip the destroying Drop.
            std::mem::forget(attr);
            return Err(init_error("pthread_mutexattr_init", rc));
        }

        let ty = match kind {
            MutexKind::Plain => libc::PTHREAD_MUTEX_ERRORCHECK,
            MutexKind::Recursive => libc::PTHREAD_MUTEX_RECURSIVE,
        };
        // SAFETY: `attr.raw` was initialized above.
        let rc = unsafe { libc::pthread_mutexattr_settype(&mut attr.raw, ty) };
        if rc != 0 {
            report(sink, Level::Error, COMPONENT, "pthread_mutexattr_settype", rc);
            return Err(init_error("pthread_mutexattr_settype", rc));
        }
        Ok(attr)
    }
}

impl Drop for MutexAttr<'_> {
    fn drop(&mut self) {
        // SAFETY: only constructed values reach here, and those were initialized.
        let rc = unsafe { libc::pthread_mutexattr_destroy(&mut self.raw) };
        if rc != 0 {
            report(self.sink, Level::Warn, COMPONENT, "pthread_mutexattr_destroy", rc);
        }
    }
}

fn init_error(operation: &'static str, code: i32) -> ThreadError {
    if code == libc::ENOMEM {
        ThreadError::ResourceExhausted { operation }
    } else {
        ThreadError::InitFailure { operation, code }
    }
}

// ---------------------------------------------------------------------------
// Raw operations
// ---------------------------------------------------------------------------

/// Validates `mtx_init` flags, reporting a rejection.
pub(crate) fn kind_from_flags(flags: i32, sink: &dyn DiagnosticSink) -> Result<MutexKind, ThreadError> {
    MutexKind::from_flags(flags).inspect_err(|err| {
        sink.report(&Diagnostic::anomaly(
            Level::Error,
            COMPONENT,
            "mtx_init",
            err.to_string(),
        ));
    })
}

/// Initializes `mutex` as `kind`.
///
/// # Safety
///
/// `mutex` must be valid, writable, suitably aligned storage that is not an
/// initialized mutex in use.
pub(crate) unsafe fn init_raw(
    mutex: *mut libc::pthread_mutex_t,
    kind: MutexKind,
    sink: &dyn DiagnosticSink,
) -> Result<(), ThreadError> {
    let attr = MutexAttr::for_kind(kind, sink)?;
    // SAFETY: caller guarantees `mutex`; `attr.raw` is initialized.
    let rc = unsafe { libc::pthread_mutex_init(mutex, &attr.raw) };
    if rc != 0 {
        report(sink, Level::Error, COMPONENT, "pthread_mutex_init", rc);
        return Err(init_error("pthread_mutex_init", rc));
    }
    Ok(())
}

/// Best-effort destroy: failures are reported, never returned.
///
/// # Safety
///
/// `mutex` must point to an initialized mutex no other thread is using.
pub(crate) unsafe fn destroy_raw(mutex: *mut libc::pthread_mutex_t, sink: &dyn DiagnosticSink) {
    // SAFETY: forwarded caller contract.
    let rc = unsafe { libc::pthread_mutex_destroy(mutex) };
    if rc != 0 {
        report(sink, Level::Warn, COMPONENT, "pthread_mutex_destroy", rc);
    }
}

/// # Safety
///
/// `mutex` must point to an initialized mutex.
pub(crate) unsafe fn lock_raw(
    mutex: *mut libc::pthread_mutex_t,
    sink: &dyn DiagnosticSink,
) -> Result<(), ThreadError> {
    // SAFETY: forwarded caller contract.
    let rc = unsafe { libc::pthread_mutex_lock(mutex) };
    if rc != 0 {
        report(sink, Level::Error, COMPONENT, "pthread_mutex_lock", rc);
        return Err(ThreadError::LockFailure {
            operation: "pthread_mutex_lock",
            code: rc,
        });
    }
    Ok(())
}

/// # Safety
///
/// `mutex` must point to an initialized mutex.
pub(crate) unsafe fn try_lock_raw(
    mutex: *mut libc::pthread_mutex_t,
    sink: &dyn DiagnosticSink,
) -> Result<LockOutcome, ThreadError> {
    // SAFETY: forwarded caller contract.
    let rc = unsafe { libc::pthread_mutex_trylock(mutex) };
    match rc {
        0 => Ok(LockOutcome::Acquired),
        libc::EBUSY => Ok(LockOutcome::Busy),
        _ => {
            report(sink, Level::Error, COMPONENT, "pthread_mutex_trylock", rc);
            Err(ThreadError::LockFailure {
                operation: "pthread_mutex_trylock",
                code: rc,
            })
        }
    }
}

/// # Safety
///
/// `mutex` must point to an initialized mutex.
pub(crate) unsafe fn unlock_raw(
    mutex: *mut libc::pthread_mutex_t,
    sink: &dyn DiagnosticSink,
) -> Result<(), ThreadError> {
    // SAFETY: forwarded caller contract.
    let rc = unsafe { libc::pthread_mutex_unlock(mutex) };
    if rc != 0 {
        report(sink, Level::Error, COMPONENT, "pthread_mutex_unlock", rc);
        return Err(ThreadError::UnlockFailure {
            operation: "pthread_mutex_unlock",
            code: rc,
        });
    }
    Ok(())
}

/// Polling driver over a raw mutex.
struct RawPoll<'a> {
    mutex: *mut libc::pthread_mutex_t,
    sink: &'a dyn DiagnosticSink,
}

impl PollDriver for RawPoll<'_> {
    fn try_acquire(&mut self) -> TryAcquire {
        // SAFETY: `timed_lock_raw` carries the same contract as `try_lock_raw`.
        match unsafe { try_lock_raw(self.mutex, self.sink) } {
            Ok(LockOutcome::Acquired) => TryAcquire::Acquired,
            Ok(_) => TryAcquire::Busy,
            Err(err) => TryAcquire::Failed(err),
        }
    }

    fn now(&mut self) -> Result<TimePoint, ThreadError> {
        native::now()
    }

    fn sleep(&mut self, span: TimeSpan) {
        note_poll_sleep(native::sleep_span(span), self.sink);
    }

    fn yield_now(&mut self) {
        native::yield_now();
    }
}

/// An interrupted poll sleep only shortens that pass. Any other failure is
/// reported and the loop carries on from a fresh clock read.
fn note_poll_sleep(result: Result<(), ThreadError>, sink: &dyn DiagnosticSink) {
    match result {
        Ok(()) | Err(ThreadError::Interrupted { .. }) => {}
        Err(err) => match err.code() {
            Some(code) => report(sink, Level::Warn, COMPONENT, "nanosleep", code),
            None => sink.report(&Diagnostic::anomaly(
                Level::Warn,
                COMPONENT,
                "nanosleep",
                err.to_string(),
            )),
        },
    }
}

/// `None` hands the attempt to the polling loop.
#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn native_timed_lock(
    mutex: *mut libc::pthread_mutex_t,
    deadline: TimePoint,
    sink: &dyn DiagnosticSink,
) -> Option<Result<LockOutcome, ThreadError>> {
    let ts = match native::point_to_timespec(deadline) {
        Ok(ts) => ts,
        Err(err) => return Some(Err(err.into())),
    };
    // SAFETY: forwarded caller contract; `ts` outlives the call.
    let rc = unsafe { libc::pthread_mutex_timedlock(mutex, &ts) };
    match rc {
        0 => Some(Ok(LockOutcome::Acquired)),
        libc::ETIMEDOUT => Some(Ok(LockOutcome::TimedOut)),
        // Plain mutex held by the caller: wait out the deadline like any
        // other holder.
        libc::EDEADLK => None,
        _ => {
            report(sink, Level::Error, COMPONENT, "pthread_mutex_timedlock", rc);
            Some(Err(ThreadError::LockFailure {
                operation: "pthread_mutex_timedlock",
                code: rc,
            }))
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
unsafe fn native_timed_lock(
    _mutex: *mut libc::pthread_mutex_t,
    _deadline: TimePoint,
    _sink: &dyn DiagnosticSink,
) -> Option<Result<LockOutcome, ThreadError>> {
    None
}

/// Acquires `mutex` before `deadline` or reports `TimedOut`.
///
/// # Safety
///
/// `mutex` must point to an initialized mutex.
pub(crate) unsafe fn timed_lock_raw(
    mutex: *mut libc::pthread_mutex_t,
    deadline: TimePoint,
    cfg: &TimedLockConfig,
    sink: &dyn DiagnosticSink,
) -> Result<LockOutcome, ThreadError> {
    let native = if cfg.strategy == TimedLockStrategy::Native {
        // SAFETY: forwarded caller contract.
        unsafe { native_timed_lock(mutex, deadline, sink) }
    } else {
        None
    };

    let result = native.unwrap_or_else(|| {
        cfg.check_span().map_err(ThreadError::from).and_then(|interval| {
            let mut driver = RawPoll { mutex, sink };
            timed_lock::run_timed_lock(&mut driver, deadline, interval)
        })
    });
    if let Err(ThreadError::InternalClock(err)) = &result {
        sink.report(&Diagnostic::anomaly(
            Level::Error,
            COMPONENT,
            "mtx_timedlock",
            err.to_string(),
        ));
    }
    result
}

// ---------------------------------------------------------------------------
// Owned mutex
// ---------------------------------------------------------------------------

/// A plain or recursive mutex.
///
/// Locking is explicit (`lock`/`unlock`), as in C11; there is no guard.
/// Dropping destroys the native mutex; dropping it while locked is reported
/// to the sink.
pub struct Mutex {
    raw: Box<UnsafeCell<libc::pthread_mutex_t>>,
    kind: MutexKind,
    sink: Arc<dyn DiagnosticSink>,
}

// SAFETY: pthread mutexes are built for concurrent use from any thread and
// the storage is boxed, so its address is stable.
unsafe impl Send for Mutex {}
// SAFETY: see above.
unsafe impl Sync for Mutex {}

impl Mutex {
    pub fn new(kind: MutexKind) -> Result<Self, ThreadError> {
        Self::with_sink(kind, diag::default_sink())
    }

    /// Creates a mutex from `mtx_init`-style flags.
    pub fn from_flags(flags: i32) -> Result<Self, ThreadError> {
        let sink = diag::default_sink();
        let kind = kind_from_flags(flags, &*sink)?;
        Self::with_sink(kind, sink)
    }

    pub fn with_sink(kind: MutexKind, sink: Arc<dyn DiagnosticSink>) -> Result<Self, ThreadError> {
        // SAFETY: plain data, initialized by `init_raw` before any use.
        let raw = Box::new(UnsafeCell::new(unsafe { std::mem::zeroed() }));
        // SAFETY: fresh, boxed, exclusively owned storage.
        unsafe { init_raw(raw.get(), kind, &*sink)? };
        Ok(Self { raw, kind, sink })
    }

    #[must_use]
    pub fn kind(&self) -> MutexKind {
        self.kind
    }

    /// Blocks until the mutex is held by the caller.
    pub fn lock(&self) -> Result<(), ThreadError> {
        // SAFETY: `raw` was initialized in the constructor.
        unsafe { lock_raw(self.as_ptr(), &*self.sink) }
    }

    /// `Acquired` or `Busy`, never blocking.
    pub fn try_lock(&self) -> Result<LockOutcome, ThreadError> {
        // SAFETY: `raw` was initialized in the constructor.
        unsafe { try_lock_raw(self.as_ptr(), &*self.sink) }
    }

    pub fn unlock(&self) -> Result<(), ThreadError> {
        // SAFETY: `raw` was initialized in the constructor.
        unsafe { unlock_raw(self.as_ptr(), &*self.sink) }
    }

    /// Acquires before `deadline` using the process-default timed-lock
    /// configuration.
    pub fn timed_lock(&self, deadline: TimePoint) -> Result<LockOutcome, ThreadError> {
        self.timed_lock_with(deadline, &config::default_config())
    }

    pub fn timed_lock_with(
        &self,
        deadline: TimePoint,
        cfg: &TimedLockConfig,
    ) -> Result<LockOutcome, ThreadError> {
        // SAFETY: `raw` was initialized in the constructor.
        unsafe { timed_lock_raw(self.as_ptr(), deadline, cfg, &*self.sink) }
    }

    /// Destroys the mutex now. Equivalent to dropping it.
    pub fn destroy(self) {
        drop(self);
    }

    pub(crate) fn as_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.raw.get()
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        // SAFETY: initialized in the constructor; `&mut self` means no users.
        unsafe { destroy_raw(self.as_ptr(), &*self.sink) };
    }
}

impl std::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex").field("kind", &self.kind).finish_non_exhaustive()
    }
}
