//! Deadline-bounded mutex acquisition by polling.
//!
//! For platforms whose thread library has a non-blocking lock but no
//! deadline-based one. The loop alternates `try_acquire` with short sleeps:
//!
//! ```text
//!            try_acquire
//!   Polling ------------> Acquired
//!      |  \--- error ---> Failed
//!      |  busy: now >= deadline
//!      +----------------> TimedOut
//!      |  busy: otherwise
//!      +-- sleep(min(interval, remaining)) or yield --> Polling
//! ```
//!
//! The sleep is recomputed from a fresh clock reading on every pass, so a
//! wall clock stepped backwards goes back to full check intervals instead of
//! staying on a short remainder computed before the step.
//!
//! Latency is bounded by the check interval; this is a fallback, not a
//! substitute for a native deadline lock.

use crate::error::ThreadError;
use crate::status::LockOutcome;
use crate::time::{ClockError, TimePoint, TimeSpan};

/// Timed-lock state machine.
///
/// `Failed` is never stored: the loop leaves through an `Err` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedLockState {
    Polling,
    Acquired,
    TimedOut,
    Failed,
}

impl TimedLockState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Polling)
    }
}

/// Result of one non-blocking acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TryAcquire {
    Acquired,
    Busy,
    Failed(ThreadError),
}

/// What the loop does after a busy attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// The deadline has passed.
    Expired,
    /// Nothing left to sleep; give up the processor and retry.
    Yield,
    /// Sleep this long, then retry.
    Sleep(TimeSpan),
}

/// Plans the next step after a busy attempt observed at `now`.
pub fn plan_poll_step(
    now: TimePoint,
    deadline: TimePoint,
    check_interval: TimeSpan,
) -> Result<PollStep, ClockError> {
    if now >= deadline {
        return Ok(PollStep::Expired);
    }
    let remaining = now.span_until(deadline)?;
    let interval = remaining.min(check_interval);
    if interval.is_zero() {
        Ok(PollStep::Yield)
    } else {
        Ok(PollStep::Sleep(interval))
    }
}

/// Native operations the polling loop needs.
pub trait PollDriver {
    fn try_acquire(&mut self) -> TryAcquire;
    fn now(&mut self) -> Result<TimePoint, ThreadError>;
    fn sleep(&mut self, span: TimeSpan);
    fn yield_now(&mut self);
}

/// Runs the polling loop to a terminal state.
///
/// Returns `Acquired` or `TimedOut`; an unexpected native error or a clock
/// invariant violation comes back as `Err`.
pub fn run_timed_lock<D: PollDriver + ?Sized>(
    driver: &mut D,
    deadline: TimePoint,
    check_interval: TimeSpan,
) -> Result<LockOutcome, ThreadError> {
    let mut state = TimedLockState::Polling;

    while !state.is_terminal() {
        state = match driver.try_acquire() {
            TryAcquire::Acquired => TimedLockState::Acquired,
            TryAcquire::Failed(err) => return Err(err),
            TryAcquire::Busy => {
                let now = driver.now()?;
                match plan_poll_step(now, deadline, check_interval)? {
                    PollStep::Expired => TimedLockState::TimedOut,
                    PollStep::Yield => {
                        driver.yield_now();
                        TimedLockState::Polling
                    }
                    PollStep::Sleep(span) => {
                        driver.sleep(span);
                        TimedLockState::Polling
                    }
                }
            }
        };
    }

    if state == TimedLockState::Acquired {
        Ok(LockOutcome::Acquired)
    } else {
        Ok(LockOutcome::TimedOut)
    }
}
