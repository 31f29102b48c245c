//! C11 `<threads.h>` result vocabulary.

use serde::Serialize;

// ---------------------------------------------------------------------------
// Result codes
// ---------------------------------------------------------------------------

/// `thrd_success`.
pub const THRD_SUCCESS: i32 = 0;
/// `thrd_error`.
pub const THRD_ERROR: i32 = 1;
/// `thrd_nomem`.
pub const THRD_NOMEM: i32 = 2;
/// `thrd_timedout`.
pub const THRD_TIMEDOUT: i32 = 3;
/// `thrd_busy`.
pub const THRD_BUSY: i32 = 4;

/// Result code returned across the C surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum ThrdStatus {
    Success = THRD_SUCCESS,
    Error = THRD_ERROR,
    NoMem = THRD_NOMEM,
    TimedOut = THRD_TIMEDOUT,
    Busy = THRD_BUSY,
}

impl ThrdStatus {
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Maps a raw code back; unknown values read as `Error`.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            THRD_SUCCESS => Self::Success,
            THRD_NOMEM => Self::NoMem,
            THRD_TIMEDOUT => Self::TimedOut,
            THRD_BUSY => Self::Busy,
            _ => Self::Error,
        }
    }
}

// ---------------------------------------------------------------------------
// Non-error outcomes
// ---------------------------------------------------------------------------

/// Outcome of an acquisition that is allowed to come back empty-handed.
///
/// `Busy` and `TimedOut` are expected results, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LockOutcome {
    Acquired,
    Busy,
    TimedOut,
}

impl LockOutcome {
    #[must_use]
    pub const fn is_acquired(self) -> bool {
        matches!(self, Self::Acquired)
    }

    #[must_use]
    pub const fn status(self) -> ThrdStatus {
        match self {
            Self::Acquired => ThrdStatus::Success,
            Self::Busy => ThrdStatus::Busy,
            Self::TimedOut => ThrdStatus::TimedOut,
        }
    }
}

/// Outcome of a condition-variable wait with a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WaitOutcome {
    /// Woken (possibly spuriously) with the mutex re-acquired.
    Signaled,
    /// Deadline passed; the mutex is re-acquired all the same.
    TimedOut,
}

impl WaitOutcome {
    #[must_use]
    pub const fn status(self) -> ThrdStatus {
        match self {
            Self::Signaled => ThrdStatus::Success,
            Self::TimedOut => ThrdStatus::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_threads_h_layout() {
        assert_eq!(ThrdStatus::Success.as_raw(), 0);
        assert_eq!(ThrdStatus::Error.as_raw(), 1);
        assert_eq!(ThrdStatus::NoMem.as_raw(), 2);
        assert_eq!(ThrdStatus::TimedOut.as_raw(), 3);
        assert_eq!(ThrdStatus::Busy.as_raw(), 4);
    }

    #[test]
    fn from_raw_folds_unknown_to_error() {
        for status in [
            ThrdStatus::Success,
            ThrdStatus::Error,
            ThrdStatus::NoMem,
            ThrdStatus::TimedOut,
            ThrdStatus::Busy,
        ] {
            assert_eq!(ThrdStatus::from_raw(status.as_raw()), status);
        }
        assert_eq!(ThrdStatus::from_raw(-7), ThrdStatus::Error);
        assert_eq!(ThrdStatus::from_raw(99), ThrdStatus::Error);
    }

    #[test]
    fn outcomes_map_to_status() {
        assert_eq!(LockOutcome::Acquired.status(), ThrdStatus::Success);
        assert_eq!(LockOutcome::Busy.status(), ThrdStatus::Busy);
        assert_eq!(LockOutcome::TimedOut.status(), ThrdStatus::TimedOut);
        assert_eq!(WaitOutcome::Signaled.status(), ThrdStatus::Success);
        assert_eq!(WaitOutcome::TimedOut.status(), ThrdStatus::TimedOut);
    }
}
