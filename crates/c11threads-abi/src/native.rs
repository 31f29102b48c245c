//! Clock, sleep and yield over `libc`, plus the shared error-reporting hook.

use std::time::Duration;

use c11threads_core::diag::{Diagnostic, DiagnosticSink, Level};
use c11threads_core::time::{ClockError, TimePoint, TimeSpan};
use c11threads_core::ThreadError;

#[inline]
pub(crate) fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Reports a failing native call to `sink`.
#[inline]
pub(crate) fn report(
    sink: &dyn DiagnosticSink,
    level: Level,
    component: &'static str,
    operation: &'static str,
    code: i32,
) {
    sink.report(&Diagnostic::native(level, component, operation, code));
}

// ---------------------------------------------------------------------------
// timespec conversion
// ---------------------------------------------------------------------------

fn to_timespec(secs: i64, nanos: i64) -> Result<libc::timespec, ClockError> {
    // SAFETY: timespec is plain data; all-zero is a valid value.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    ts.tv_sec = libc::time_t::try_from(secs).map_err(|_| ClockError::Overflow)?;
    ts.tv_nsec = libc::c_long::try_from(nanos).map_err(|_| ClockError::Overflow)?;
    Ok(ts)
}

/// Fails with `Overflow` where `time_t` is narrower than the point.
pub(crate) fn point_to_timespec(tp: TimePoint) -> Result<libc::timespec, ClockError> {
    to_timespec(tp.secs(), tp.nanos())
}

pub(crate) fn span_to_timespec(span: TimeSpan) -> Result<libc::timespec, ClockError> {
    to_timespec(span.secs(), span.nanos())
}

pub(crate) fn timespec_to_point(ts: &libc::timespec) -> Result<TimePoint, ClockError> {
    TimePoint::new(i64::from(ts.tv_sec), i64::from(ts.tv_nsec))
}

pub(crate) fn timespec_to_span(ts: &libc::timespec) -> Result<TimeSpan, ClockError> {
    TimeSpan::new(i64::from(ts.tv_sec), i64::from(ts.tv_nsec))
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Current wall-clock time (`CLOCK_REALTIME`, the clock C11 deadlines and
/// default condition variables use).
///
/// A reading whose nanosecond field is out of range is an error rather
/// than something to clamp.
pub fn now() -> Result<TimePoint, ThreadError> {
    // SAFETY: timespec is plain data; all-zero is a valid value.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: `ts` is a valid out-pointer for the duration of the call.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
    if rc != 0 {
        return Err(ClockError::ReadFailed { code: last_errno() }.into());
    }
    Ok(timespec_to_point(&ts)?)
}

/// `now() + timeout`, for building deadlines.
pub fn deadline_after(timeout: Duration) -> Result<TimePoint, ThreadError> {
    Ok(now()?.after(timeout)?)
}

// ---------------------------------------------------------------------------
// Sleep / yield
// ---------------------------------------------------------------------------

/// Gives up the rest of the caller's time slice.
#[inline]
pub fn yield_now() {
    // SAFETY: sched_yield takes no arguments and cannot fail on Linux.
    unsafe { libc::sched_yield() };
}

/// Suspends the caller for at least `span`.
///
/// A signal cutting the sleep short yields
/// [`ThreadError::Interrupted`] carrying the part not slept.
pub fn sleep_span(span: TimeSpan) -> Result<(), ThreadError> {
    let request = span_to_timespec(span)?;
    // SAFETY: timespec is plain data; all-zero is a valid value.
    let mut remaining: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: both pointers reference live stack values.
    let rc = unsafe { libc::nanosleep(&request, &mut remaining) };
    if rc == 0 {
        return Ok(());
    }
    let code = last_errno();
    if code == libc::EINTR {
        let remaining = timespec_to_span(&remaining)?;
        return Err(ThreadError::Interrupted { remaining });
    }
    Err(ThreadError::SleepFailure {
        operation: "nanosleep",
        code,
    })
}

/// [`sleep_span`] for a `Duration`.
pub fn sleep_for(duration: Duration) -> Result<(), ThreadError> {
    sleep_span(TimeSpan::from_duration(duration)?)
}
