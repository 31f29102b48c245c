//! Deadline arithmetic.
//!
//! C11 timed operations take an absolute `struct timespec` deadline. This
//! module models that as [`TimePoint`] and the gap between two points as
//! [`TimeSpan`]. Both keep their nanosecond component inside `[0, 10^9)`;
//! construction rejects anything else and subtraction that would go
//! negative is an error, never a silent zero.

use std::cmp::Ordering;
use std::time::Duration;

use thiserror::Error;

/// Nanoseconds in one second.
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Invariant violations in time arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("nanosecond component {nsec} outside [0, 1e9) (sec={sec})")]
    Unnormalized { sec: i64, nsec: i64 },
    #[error("negative interval {sec}s {nsec}ns")]
    NegativeInterval { sec: i64, nsec: i64 },
    #[error("time arithmetic overflowed")]
    Overflow,
    #[error("clock read failed with code {code}")]
    ReadFailed { code: i32 },
}

// ---------------------------------------------------------------------------
// TimePoint
// ---------------------------------------------------------------------------

/// An absolute instant on the wall clock (seconds + nanoseconds since the
/// epoch), as used for deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimePoint {
    sec: i64,
    nsec: i64,
}

impl TimePoint {
    /// The epoch itself.
    pub const EPOCH: Self = Self { sec: 0, nsec: 0 };

    /// Builds a point from raw `timespec` components.
    pub const fn new(sec: i64, nsec: i64) -> Result<Self, ClockError> {
        if nsec < 0 || nsec >= NANOS_PER_SEC {
            return Err(ClockError::Unnormalized { sec, nsec });
        }
        Ok(Self { sec, nsec })
    }

    #[must_use]
    pub const fn secs(self) -> i64 {
        self.sec
    }

    #[must_use]
    pub const fn nanos(self) -> i64 {
        self.nsec
    }

    /// `self + span`.
    pub fn checked_add(self, span: TimeSpan) -> Result<Self, ClockError> {
        let mut sec = self
            .sec
            .checked_add(span.sec)
            .ok_or(ClockError::Overflow)?;
        let mut nsec = self.nsec + span.nsec;
        if nsec >= NANOS_PER_SEC {
            nsec -= NANOS_PER_SEC;
            sec = sec.checked_add(1).ok_or(ClockError::Overflow)?;
        }
        Self::new(sec, nsec)
    }

    /// `self + duration`, for building deadlines relative to a clock reading.
    pub fn after(self, duration: Duration) -> Result<Self, ClockError> {
        self.checked_add(TimeSpan::from_duration(duration)?)
    }

    /// The interval from `self` until `later`.
    ///
    /// Fails with [`ClockError::NegativeInterval`] when `later` precedes
    /// `self`. Callers that want "already passed" semantics compare the two
    /// points first.
    pub fn span_until(self, later: TimePoint) -> Result<TimeSpan, ClockError> {
        span_between(self.sec, self.nsec, later.sec, later.nsec)
    }
}

impl PartialOrd for TimePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimePoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sec
            .cmp(&other.sec)
            .then_with(|| self.nsec.cmp(&other.nsec))
    }
}

/// Raw `later - earlier` over timespec components.
///
/// Components are taken as given so that readings straight off a native
/// clock are checked here rather than trusted.
pub fn span_between(
    earlier_sec: i64,
    earlier_nsec: i64,
    later_sec: i64,
    later_nsec: i64,
) -> Result<TimeSpan, ClockError> {
    let mut sec = later_sec
        .checked_sub(earlier_sec)
        .ok_or(ClockError::Overflow)?;
    let mut nsec = later_nsec
        .checked_sub(earlier_nsec)
        .ok_or(ClockError::Overflow)?;
    if nsec < 0 {
        nsec += NANOS_PER_SEC;
        sec = sec.checked_sub(1).ok_or(ClockError::Overflow)?;
    }
    if !(0..NANOS_PER_SEC).contains(&nsec) {
        return Err(ClockError::Unnormalized { sec, nsec });
    }
    if sec < 0 {
        return Err(ClockError::NegativeInterval { sec, nsec });
    }
    Ok(TimeSpan { sec, nsec })
}

// ---------------------------------------------------------------------------
// TimeSpan
// ---------------------------------------------------------------------------

/// A non-negative interval with timespec resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TimeSpan {
    sec: i64,
    nsec: i64,
}

impl TimeSpan {
    pub const ZERO: Self = Self { sec: 0, nsec: 0 };

    /// Builds a span from raw components; both must be non-negative and
    /// `nsec` below one second.
    pub const fn new(sec: i64, nsec: i64) -> Result<Self, ClockError> {
        if sec < 0 {
            return Err(ClockError::NegativeInterval { sec, nsec });
        }
        if nsec < 0 || nsec >= NANOS_PER_SEC {
            return Err(ClockError::Unnormalized { sec, nsec });
        }
        Ok(Self { sec, nsec })
    }

    pub fn from_duration(duration: Duration) -> Result<Self, ClockError> {
        let sec = i64::try_from(duration.as_secs()).map_err(|_| ClockError::Overflow)?;
        Ok(Self {
            sec,
            nsec: i64::from(duration.subsec_nanos()),
        })
    }

    #[must_use]
    pub const fn secs(self) -> i64 {
        self.sec
    }

    #[must_use]
    pub const fn nanos(self) -> i64 {
        self.nsec
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    #[must_use]
    pub fn as_duration(self) -> Duration {
        // Both components are non-negative by construction.
        Duration::new(self.sec as u64, self.nsec as u32)
    }
}

impl PartialOrd for TimeSpan {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeSpan {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sec
            .cmp(&other.sec)
            .then_with(|| self.nsec.cmp(&other.nsec))
    }
}
