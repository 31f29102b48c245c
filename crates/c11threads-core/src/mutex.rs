//! Mutex type flags and the mutex state contract.
//!
//! `mtx_init` takes an `int` built from the flags below. Only two kinds are
//! supported: plain and recursive. `MTX_TIMED` may be or'ed onto either,
//! since every mutex here accepts a deadline-bounded acquisition.

use crate::error::ThreadError;

// ---------------------------------------------------------------------------
// Type flags
// ---------------------------------------------------------------------------

/// `mtx_plain`.
pub const MTX_PLAIN: i32 = 1 << 0;
/// `mtx_recursive`.
pub const MTX_RECURSIVE: i32 = 1 << 1;
/// `mtx_timed`.
pub const MTX_TIMED: i32 = 1 << 2;

const MTX_PLAIN_RECURSIVE: i32 = MTX_PLAIN | MTX_RECURSIVE;

/// Mutex behaviour, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MutexKind {
    /// Re-acquisition by the holder is refused.
    #[default]
    Plain,
    /// The holder may re-acquire; each acquisition needs its own release.
    Recursive,
}

impl MutexKind {
    /// Validates `mtx_init` flags.
    ///
    /// Checked before any native resource is touched, so a rejection leaves
    /// nothing behind.
    pub const fn from_flags(flags: i32) -> Result<Self, ThreadError> {
        match flags & !MTX_TIMED {
            MTX_PLAIN => Ok(Self::Plain),
            MTX_PLAIN_RECURSIVE => Ok(Self::Recursive),
            _ => Err(ThreadError::UnsupportedConfiguration { flags }),
        }
    }

    #[must_use]
    pub const fn flags(self) -> i32 {
        match self {
            Self::Plain => MTX_PLAIN,
            Self::Recursive => MTX_PLAIN_RECURSIVE,
        }
    }

    #[must_use]
    pub const fn is_recursive(self) -> bool {
        matches!(self, Self::Recursive)
    }
}

// ---------------------------------------------------------------------------
// State contract
// ---------------------------------------------------------------------------

/// Abstract mutex state as seen from the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexState {
    Unlocked,
    /// Held by the caller `depth` times (always 1 for plain mutexes).
    LockedBySelf { depth: u32 },
    LockedByOther,
    Destroyed,
}

/// Operations covered by the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexOp {
    Lock,
    TryLock,
    Unlock,
    Destroy,
}

/// Expected result of an operation in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractResult {
    Success,
    Busy,
    LockFailure,
    UnlockFailure,
    /// Reported to diagnostics and swallowed (destroy is best effort).
    Reported,
    /// Use after destroy.
    Undefined,
}

/// What the contract says happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractOutcome {
    pub next: MutexState,
    pub result: ContractResult,
    /// Whether the caller waits on another thread before returning.
    pub blocks: bool,
}

const fn outcome(next: MutexState, result: ContractResult, blocks: bool) -> ContractOutcome {
    ContractOutcome {
        next,
        result,
        blocks,
    }
}

/// Contract transition for `op` on a mutex of `kind` in `state`.
#[must_use]
pub const fn contract_transition(kind: MutexKind, state: MutexState, op: MutexOp) -> ContractOutcome {
    use ContractResult as R;
    use MutexState as S;

    match state {
        S::Destroyed => outcome(S::Destroyed, R::Undefined, false),
        S::Unlocked => match op {
            MutexOp::Lock | MutexOp::TryLock => {
                outcome(S::LockedBySelf { depth: 1 }, R::Success, false)
            }
            MutexOp::Unlock => outcome(S::Unlocked, R::UnlockFailure, false),
            MutexOp::Destroy => outcome(S::Destroyed, R::Success, false),
        },
        S::LockedByOther => match op {
            MutexOp::Lock => outcome(S::LockedBySelf { depth: 1 }, R::Success, true),
            MutexOp::TryLock => outcome(S::LockedByOther, R::Busy, false),
            MutexOp::Unlock => outcome(S::LockedByOther, R::UnlockFailure, false),
            MutexOp::Destroy => outcome(S::LockedByOther, R::Reported, false),
        },
        S::LockedBySelf { depth } => match op {
            MutexOp::Lock => {
                if kind.is_recursive() {
                    outcome(S::LockedBySelf { depth: depth.saturating_add(1) }, R::Success, false)
                } else {
                    outcome(state, R::LockFailure, false)
                }
            }
            MutexOp::TryLock => {
                if kind.is_recursive() {
                    outcome(S::LockedBySelf { depth: depth.saturating_add(1) }, R::Success, false)
                } else {
                    outcome(state, R::Busy, false)
                }
            }
            MutexOp::Unlock => {
                if depth > 1 {
                    outcome(S::LockedBySelf { depth: depth - 1 }, R::Success, false)
                } else {
                    outcome(S::Unlocked, R::Success, false)
                }
            }
            MutexOp::Destroy => outcome(state, R::Reported, false),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_values() {
        assert_eq!(MTX_PLAIN, 1);
        assert_eq!(MTX_RECURSIVE, 2);
        assert_eq!(MTX_TIMED, 4);
    }

    #[test]
    fn supported_flag_combinations() {
        assert_eq!(MutexKind::from_flags(MTX_PLAIN), Ok(MutexKind::Plain));
        assert_eq!(
            MutexKind::from_flags(MTX_PLAIN | MTX_RECURSIVE),
            Ok(MutexKind::Recursive)
        );
        assert_eq!(
            MutexKind::from_flags(MTX_PLAIN | MTX_TIMED),
            Ok(MutexKind::Plain)
        );
        assert_eq!(
            MutexKind::from_flags(MTX_PLAIN | MTX_RECURSIVE | MTX_TIMED),
            Ok(MutexKind::Recursive)
        );
    }

    #[test]
    fn unsupported_flags_are_rejected() {
        for flags in [0, MTX_RECURSIVE, MTX_TIMED, 8, -1, i32::MAX] {
            assert_eq!(
                MutexKind::from_flags(flags),
                Err(ThreadError::UnsupportedConfiguration { flags }),
                "flags={flags:#x}"
            );
        }
    }

    #[test]
    fn kind_flags_round_trip() {
        for kind in [MutexKind::Plain, MutexKind::Recursive] {
            assert_eq!(MutexKind::from_flags(kind.flags()), Ok(kind));
        }
    }

    #[test]
    fn plain_relock_by_holder_fails() {
        let got = contract_transition(
            MutexKind::Plain,
            MutexState::LockedBySelf { depth: 1 },
            MutexOp::Lock,
        );
        assert_eq!(got.result, ContractResult::LockFailure);
        assert!(!got.blocks);
    }

    #[test]
    fn recursive_depth_tracks_lock_and_unlock() {
        let mut state = MutexState::Unlocked;
        for _ in 0..3 {
            state = contract_transition(MutexKind::Recursive, state, MutexOp::Lock).next;
        }
        assert_eq!(state, MutexState::LockedBySelf { depth: 3 });
        for _ in 0..2 {
            state = contract_transition(MutexKind::Recursive, state, MutexOp::Unlock).next;
        }
        assert_eq!(state, MutexState::LockedBySelf { depth: 1 });
        state = contract_transition(MutexKind::Recursive, state, MutexOp::Unlock).next;
        assert_eq!(state, MutexState::Unlocked);
    }

    #[test]
    fn contended_try_lock_is_busy_and_lock_blocks() {
        let try_lock =
            contract_transition(MutexKind::Plain, MutexState::LockedByOther, MutexOp::TryLock);
        assert_eq!(try_lock.result, ContractResult::Busy);
        assert!(!try_lock.blocks);

        let lock = contract_transition(MutexKind::Plain, MutexState::LockedByOther, MutexOp::Lock);
        assert_eq!(lock.result, ContractResult::Success);
        assert!(lock.blocks);
    }

    #[test]
    fn destroyed_is_terminal() {
        for op in [MutexOp::Lock, MutexOp::TryLock, MutexOp::Unlock, MutexOp::Destroy] {
            let got = contract_transition(MutexKind::Plain, MutexState::Destroyed, op);
            assert_eq!(got.next, MutexState::Destroyed);
            assert_eq!(got.result, ContractResult::Undefined);
        }
    }
}
