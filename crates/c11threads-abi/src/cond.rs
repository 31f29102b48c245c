//! Condition variables over `pthread_cond_t`.
//!
//! Waits always pair with a [`Mutex`] held by the caller. Spurious wakeups
//! are passed through; callers re-check their predicate in a loop.

use std::cell::UnsafeCell;
use std::sync::Arc;

use c11threads_core::diag::{self, Diagnostic, DiagnosticSink, Level};
use c11threads_core::time::TimePoint;
use c11threads_core::{ThreadError, WaitOutcome};

use crate::mutex::Mutex;
use crate::native::{self, report};

const COMPONENT: &str = "cond";

// ---------------------------------------------------------------------------
// Raw operations
// ---------------------------------------------------------------------------

/// # Safety
///
/// `cond` must be valid, writable, suitably aligned storage that is not an
/// initialized condition variable in use.
pub(crate) unsafe fn init_raw(
    cond: *mut libc::pthread_cond_t,
    sink: &dyn DiagnosticSink,
) -> Result<(), ThreadError> {
    // SAFETY: forwarded caller contract; default attributes.
    let rc = unsafe { libc::pthread_cond_init(cond, std::ptr::null()) };
    match rc {
        0 => Ok(()),
        libc::ENOMEM => {
            report(sink, Level::Error, COMPONENT, "pthread_cond_init", rc);
            Err(ThreadError::ResourceExhausted {
                operation: "pthread_cond_init",
            })
        }
        _ => {
            report(sink, Level::Error, COMPONENT, "pthread_cond_init", rc);
            Err(ThreadError::InitFailure {
                operation: "pthread_cond_init",
                code: rc,
            })
        }
    }
}

/// Best-effort destroy.
///
/// # Safety
///
/// `cond` must point to an initialized condition variable with no waiters.
pub(crate) unsafe fn destroy_raw(cond: *mut libc::pthread_cond_t, sink: &dyn DiagnosticSink) {
    // SAFETY: forwarded caller contract.
    let rc = unsafe { libc::pthread_cond_destroy(cond) };
    if rc != 0 {
        report(sink, Level::Warn, COMPONENT, "pthread_cond_destroy", rc);
    }
}

/// # Safety
///
/// `cond` and `mutex` must be initialized, and `mutex` held by the caller.
pub(crate) unsafe fn wait_raw(
    cond: *mut libc::pthread_cond_t,
    mutex: *mut libc::pthread_mutex_t,
    sink: &dyn DiagnosticSink,
) -> Result<(), ThreadError> {
    // SAFETY: forwarded caller contract.
    let rc = unsafe { libc::pthread_cond_wait(cond, mutex) };
    if rc != 0 {
        report(sink, Level::Error, COMPONENT, "pthread_cond_wait", rc);
        return Err(ThreadError::WaitFailure {
            operation: "pthread_cond_wait",
            code: rc,
        });
    }
    Ok(())
}

/// # Safety
///
/// `cond` and `mutex` must be initialized, and `mutex` held by the caller.
pub(crate) unsafe fn timed_wait_raw(
    cond: *mut libc::pthread_cond_t,
    mutex: *mut libc::pthread_mutex_t,
    deadline: TimePoint,
    sink: &dyn DiagnosticSink,
) -> Result<WaitOutcome, ThreadError> {
    let ts = native::point_to_timespec(deadline).map_err(|err| {
        sink.report(&Diagnostic::anomaly(
            Level::Error,
            COMPONENT,
            "cnd_timedwait",
            err.to_string(),
        ));
        ThreadError::from(err)
    })?;
    // SAFETY: forwarded caller contract; `ts` outlives the call.
    let rc = unsafe { libc::pthread_cond_timedwait(cond, mutex, &ts) };
    match rc {
        0 => Ok(WaitOutcome::Signaled),
        libc::ETIMEDOUT => Ok(WaitOutcome::TimedOut),
        _ => {
            report(sink, Level::Error, COMPONENT, "pthread_cond_timedwait", rc);
            Err(ThreadError::WaitFailure {
                operation: "pthread_cond_timedwait",
                code: rc,
            })
        }
    }
}

/// # Safety
///
/// `cond` must point to an initialized condition variable.
pub(crate) unsafe fn signal_raw(
    cond: *mut libc::pthread_cond_t,
    sink: &dyn DiagnosticSink,
) -> Result<(), ThreadError> {
    // SAFETY: forwarded caller contract.
    let rc = unsafe { libc::pthread_cond_signal(cond) };
    if rc != 0 {
        report(sink, Level::Error, COMPONENT, "pthread_cond_signal", rc);
        return Err(ThreadError::SignalFailure {
            operation: "pthread_cond_signal",
            code: rc,
        });
    }
    Ok(())
}

/// # Safety
///
/// `cond` must point to an initialized condition variable.
pub(crate) unsafe fn broadcast_raw(
    cond: *mut libc::pthread_cond_t,
    sink: &dyn DiagnosticSink,
) -> Result<(), ThreadError> {
    // SAFETY: forwarded caller contract.
    let rc = unsafe { libc::pthread_cond_broadcast(cond) };
    if rc != 0 {
        report(sink, Level::Error, COMPONENT, "pthread_cond_broadcast", rc);
        return Err(ThreadError::SignalFailure {
            operation: "pthread_cond_broadcast",
            code: rc,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Owned condition variable
// ---------------------------------------------------------------------------

/// A condition variable.
pub struct Condvar {
    raw: Box<UnsafeCell<libc::pthread_cond_t>>,
    sink: Arc<dyn DiagnosticSink>,
}

// SAFETY: pthread condition variables are built for use from any thread and
// the storage is boxed, so its address is stable.
unsafe impl Send for Condvar {}
// SAFETY: see above.
unsafe impl Sync for Condvar {}

impl Condvar {
    pub fn new() -> Result<Self, ThreadError> {
        Self::with_sink(diag::default_sink())
    }

    pub fn with_sink(sink: Arc<dyn DiagnosticSink>) -> Result<Self, ThreadError> {
        // SAFETY: plain data, initialized by `init_raw` before any use.
        let raw = Box::new(UnsafeCell::new(unsafe { std::mem::zeroed() }));
        // SAFETY: fresh, boxed, exclusively owned storage.
        unsafe { init_raw(raw.get(), &*sink)? };
        Ok(Self { raw, sink })
    }

    /// Releases `mutex`, sleeps until woken, and re-acquires `mutex` before
    /// returning. The caller must hold `mutex`.
    pub fn wait(&self, mutex: &Mutex) -> Result<(), ThreadError> {
        // SAFETY: both were initialized by their constructors; the native
        // call rejects a mutex the caller does not hold.
        unsafe { wait_raw(self.as_ptr(), mutex.as_ptr(), &*self.sink) }
    }

    /// Like [`wait`](Self::wait), giving up at `deadline`. On `TimedOut` the
    /// mutex is still re-acquired.
    pub fn timed_wait(&self, mutex: &Mutex, deadline: TimePoint) -> Result<WaitOutcome, ThreadError> {
        // SAFETY: see `wait`.
        unsafe { timed_wait_raw(self.as_ptr(), mutex.as_ptr(), deadline, &*self.sink) }
    }

    /// Wakes at least one waiter, if any.
    pub fn signal(&self) -> Result<(), ThreadError> {
        // SAFETY: initialized in the constructor.
        unsafe { signal_raw(self.as_ptr(), &*self.sink) }
    }

    /// Wakes every current waiter.
    pub fn broadcast(&self) -> Result<(), ThreadError> {
        // SAFETY: initialized in the constructor.
        unsafe { broadcast_raw(self.as_ptr(), &*self.sink) }
    }

    /// Destroys the condition variable now. Equivalent to dropping it.
    pub fn destroy(self) {
        drop(self);
    }

    fn as_ptr(&self) -> *mut libc::pthread_cond_t {
        self.raw.get()
    }
}

impl Drop for Condvar {
    fn drop(&mut self) {
        // SAFETY: initialized in the constructor; `&mut self` means no waiters.
        unsafe { destroy_raw(self.as_ptr(), &*self.sink) };
    }
}

impl std::fmt::Debug for Condvar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condvar").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use c11threads_core::diag::MemorySink;
    use c11threads_core::MutexKind;
    use std::time::{Duration, Instant};

    #[test]
    fn signal_and_broadcast_without_waiters_succeed() {
        let sink = Arc::new(MemorySink::new());
        let cv = Condvar::with_sink(sink.clone()).unwrap();
        cv.signal().unwrap();
        cv.broadcast().unwrap();
        cv.destroy();
        assert!(sink.is_empty());
    }

    #[test]
    fn timed_wait_times_out_holding_the_mutex() {
        let cv = Condvar::new().unwrap();
        let m = Mutex::new(MutexKind::Plain).unwrap();
        m.lock().unwrap();
        let start = Instant::now();
        let deadline = native::deadline_after(Duration::from_millis(20)).unwrap();
        assert_eq!(cv.timed_wait(&m, deadline).unwrap(), WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(15));
        // Still held: a plain mutex refuses the holder's try-lock.
        assert_eq!(m.try_lock().unwrap(), c11threads_core::LockOutcome::Busy);
        m.unlock().unwrap();
    }

    #[test]
    fn timed_wait_with_past_deadline_returns_at_once() {
        let cv = Condvar::new().unwrap();
        let m = Mutex::new(MutexKind::Plain).unwrap();
        m.lock().unwrap();
        let past = TimePoint::new(1, 0).unwrap();
        assert_eq!(cv.timed_wait(&m, past).unwrap(), WaitOutcome::TimedOut);
        m.unlock().unwrap();
    }

    #[test]
    fn wait_without_holding_errorcheck_mutex_fails() {
        let sink = Arc::new(MemorySink::new());
        let cv = Condvar::with_sink(sink.clone()).unwrap();
        let m = Mutex::new(MutexKind::Plain).unwrap();
        let deadline = native::deadline_after(Duration::from_millis(1)).unwrap();
        let err = cv.timed_wait(&m, deadline).unwrap_err();
        assert!(matches!(err, ThreadError::WaitFailure { code, .. } if code == libc::EPERM));
        assert_eq!(sink.entries()[0].operation, "pthread_cond_timedwait");
    }
}
