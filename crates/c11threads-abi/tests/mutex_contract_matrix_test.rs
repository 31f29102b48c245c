//! Drives real mutexes through every reachable contract state and checks
//! each operation's observable result against `contract_transition`.

#![cfg(unix)]

use std::sync::mpsc;
use std::sync::Arc;

use c11threads_abi::Mutex;
use c11threads_core::diag::MemorySink;
use c11threads_core::mutex::{contract_transition, ContractResult, MutexOp, MutexState};
use c11threads_core::{LockOutcome, MutexKind, ThreadError};

/// Another thread holding a mutex until told to let go.
struct ForeignHolder {
    release: mpsc::Sender<()>,
    done: std::thread::JoinHandle<()>,
}

impl ForeignHolder {
    fn hold(m: &Arc<Mutex>) -> Self {
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release, release_rx) = mpsc::channel::<()>();
        let m = Arc::clone(m);
        let done = std::thread::spawn(move || {
            m.lock().unwrap();
            locked_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            m.unlock().unwrap();
        });
        locked_rx.recv().unwrap();
        Self { release, done }
    }

    fn release(self) {
        self.release.send(()).unwrap();
        self.done.join().unwrap();
    }
}

fn observe(m: &Mutex, op: MutexOp) -> ContractResult {
    match op {
        MutexOp::Lock => match m.lock() {
            Ok(()) => ContractResult::Success,
            Err(ThreadError::LockFailure { .. }) => ContractResult::LockFailure,
            Err(err) => panic!("unexpected lock error {err}"),
        },
        MutexOp::TryLock => match m.try_lock() {
            Ok(LockOutcome::Acquired) => ContractResult::Success,
            Ok(LockOutcome::Busy) => ContractResult::Busy,
            other => panic!("unexpected try_lock result {other:?}"),
        },
        MutexOp::Unlock => match m.unlock() {
            Ok(()) => ContractResult::Success,
            Err(ThreadError::UnlockFailure { .. }) => ContractResult::UnlockFailure,
            Err(err) => panic!("unexpected unlock error {err}"),
        },
        MutexOp::Destroy => unreachable!("destroy is checked separately"),
    }
}

#[test]
fn self_owned_states_match_contract() {
    for kind in [MutexKind::Plain, MutexKind::Recursive] {
        for op in [MutexOp::Lock, MutexOp::TryLock, MutexOp::Unlock] {
            for depth in 0..3u32 {
                if depth > 1 && !kind.is_recursive() {
                    continue;
                }
                let m = Mutex::with_sink(kind, Arc::new(MemorySink::new())).unwrap();
                for _ in 0..depth {
                    m.lock().unwrap();
                }
                let state = if depth == 0 {
                    MutexState::Unlocked
                } else {
                    MutexState::LockedBySelf { depth }
                };

                let expected = contract_transition(kind, state, op);
                let got = observe(&m, op);
                assert_eq!(got, expected.result, "kind={kind:?} state={state:?} op={op:?}");

                // Walk back to unlocked using the contract's successor state.
                let held = match expected.next {
                    MutexState::LockedBySelf { depth } => depth,
                    _ => 0,
                };
                for _ in 0..held {
                    m.unlock().unwrap();
                }
                assert!(m.unlock().is_err(), "left locked: kind={kind:?} op={op:?}");
            }
        }
    }
}

#[test]
fn foreign_owned_non_blocking_ops_match_contract() {
    for kind in [MutexKind::Plain, MutexKind::Recursive] {
        for op in [MutexOp::TryLock, MutexOp::Unlock] {
            let m = Arc::new(Mutex::with_sink(kind, Arc::new(MemorySink::new())).unwrap());
            let holder = ForeignHolder::hold(&m);

            let expected = contract_transition(kind, MutexState::LockedByOther, op);
            assert!(!expected.blocks);
            assert_eq!(observe(&m, op), expected.result, "kind={kind:?} op={op:?}");
            holder.release();
        }
    }
}

#[test]
fn foreign_owned_lock_blocks_then_succeeds() {
    for kind in [MutexKind::Plain, MutexKind::Recursive] {
        let m = Arc::new(Mutex::with_sink(kind, Arc::new(MemorySink::new())).unwrap());
        let holder = ForeignHolder::hold(&m);
        let expected = contract_transition(kind, MutexState::LockedByOther, MutexOp::Lock);
        assert!(expected.blocks);

        let waiter = {
            let m = Arc::clone(&m);
            std::thread::spawn(move || {
                let got = observe(&m, MutexOp::Lock);
                m.unlock().unwrap();
                got
            })
        };
        holder.release();
        assert_eq!(waiter.join().unwrap(), expected.result);
    }
}

#[test]
fn destroy_while_held_is_reported_not_returned() {
    for kind in [MutexKind::Plain, MutexKind::Recursive] {
        let sink = Arc::new(MemorySink::new());
        let m = Mutex::with_sink(kind, sink.clone()).unwrap();
        m.lock().unwrap();
        let expected =
            contract_transition(kind, MutexState::LockedBySelf { depth: 1 }, MutexOp::Destroy);
        assert_eq!(expected.result, ContractResult::Reported);
        m.destroy();
        let entries = sink.entries();
        assert_eq!(entries.len(), 1, "kind={kind:?}");
        assert_eq!(entries[0].operation, "pthread_mutex_destroy");
    }
}

#[test]
fn destroy_unlocked_is_silent() {
    let sink = Arc::new(MemorySink::new());
    let m = Mutex::with_sink(MutexKind::Plain, sink.clone()).unwrap();
    let expected = contract_transition(MutexKind::Plain, MutexState::Unlocked, MutexOp::Destroy);
    assert_eq!(expected.result, ContractResult::Success);
    m.destroy();
    assert!(sink.is_empty());
}
