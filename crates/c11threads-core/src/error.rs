//! Error type shared by every fallible operation.

use thiserror::Error;

use crate::status::ThrdStatus;
use crate::time::{ClockError, TimeSpan};

/// Failure of a threading operation.
///
/// Variants carrying `code` keep the raw value the native primitive
/// returned; `operation` names that primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThreadError {
    #[error("unsupported mutex type flags {flags:#x}")]
    UnsupportedConfiguration { flags: i32 },
    #[error("{operation}: out of memory")]
    ResourceExhausted { operation: &'static str },
    #[error("{operation} failed with code {code}")]
    InitFailure { operation: &'static str, code: i32 },
    #[error("{operation} failed with code {code}")]
    CreationFailure { operation: &'static str, code: i32 },
    #[error("{operation} failed with code {code}")]
    JoinFailure { operation: &'static str, code: i32 },
    #[error("{operation} failed with code {code}")]
    LockFailure { operation: &'static str, code: i32 },
    #[error("{operation} failed with code {code}")]
    UnlockFailure { operation: &'static str, code: i32 },
    #[error("{operation} failed with code {code}")]
    WaitFailure { operation: &'static str, code: i32 },
    #[error("{operation} failed with code {code}")]
    SignalFailure { operation: &'static str, code: i32 },
    #[error("{operation} failed with code {code}")]
    SleepFailure { operation: &'static str, code: i32 },
    #[error("sleep interrupted with {remaining:?} left")]
    Interrupted { remaining: TimeSpan },
    #[error("thread entry point panicked")]
    EntryPanicked,
    #[error("internal clock error: {0}")]
    InternalClock(#[from] ClockError),
}

impl ThreadError {
    /// The C11 result code this error is reported as.
    #[must_use]
    pub const fn status(&self) -> ThrdStatus {
        match self {
            Self::ResourceExhausted { .. } => ThrdStatus::NoMem,
            _ => ThrdStatus::Error,
        }
    }

    /// Raw native error code, when one exists.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::InitFailure { code, .. }
            | Self::CreationFailure { code, .. }
            | Self::JoinFailure { code, .. }
            | Self::LockFailure { code, .. }
            | Self::UnlockFailure { code, .. }
            | Self::WaitFailure { code, .. }
            | Self::SignalFailure { code, .. }
            | Self::SleepFailure { code, .. } => Some(*code),
            _ => None,
        }
    }
}
