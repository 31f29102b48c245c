//! Every result record is freed exactly once, whichever path ends the
//! thread's life. Kept in its own binary so the live-record count is not
//! disturbed by unrelated tests.

#![cfg(unix)]

use std::ffi::c_void;
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use c11threads_abi::thread::{self, live_result_records, Builder};
use c11threads_core::diag::{MemorySink, NullSink};
use c11threads_core::{Level, ThreadError};

fn wait_for_live_records(expected: usize) {
    let start = Instant::now();
    loop {
        let live = live_result_records();
        if live == expected {
            return;
        }
        if start.elapsed() > Duration::from_secs(10) {
            panic!("live result records stuck at {live}, expected {expected}");
        }
        std::thread::yield_now();
    }
}

#[test]
fn records_are_freed_once_under_concurrent_spawn_join_and_detach() {
    const SPAWNERS: usize = 8;
    const ROUNDS: usize = 200;
    assert_eq!(live_result_records(), 0);

    let start = Arc::new(Barrier::new(SPAWNERS));
    let spawners: Vec<_> = (0..SPAWNERS)
        .map(|s| {
            let start = Arc::clone(&start);
            std::thread::spawn(move || {
                start.wait();
                for i in 0..ROUNDS {
                    let value = (s * ROUNDS + i) as i32;
                    let handle = thread::spawn(move || value).unwrap();
                    match i % 3 {
                        0 => assert_eq!(handle.join().unwrap(), value),
                        // Dropped while the body may still be running.
                        1 => drop(handle),
                        _ => {
                            std::thread::sleep(Duration::from_micros(50));
                            drop(handle);
                        }
                    }
                }
            })
        })
        .collect();
    for spawner in spawners {
        spawner.join().unwrap();
    }

    // Detached bodies free their own records once they finish.
    wait_for_live_records(0);

    // A rejected spawn leaves no record behind.
    let err = Builder::new()
        .sink(Arc::new(NullSink))
        .stack_size(1)
        .spawn(|| 0)
        .unwrap_err();
    assert_eq!(err.code(), Some(libc::EINVAL));
    assert_eq!(live_result_records(), 0);

    // pthread_create itself refuses: the allocated record goes back.
    let err = Builder::new()
        .sink(Arc::new(NullSink))
        .stack_size(1usize << 46)
        .spawn(|| 3)
        .unwrap_err();
    assert!(
        matches!(err, ThreadError::CreationFailure { operation: "pthread_create", .. }),
        "{err:?}"
    );
    assert_eq!(live_result_records(), 0);

    // A panicking body still hands its record back.
    let handle = Builder::new()
        .sink(Arc::new(NullSink))
        .spawn(|| panic!("unwound"))
        .unwrap();
    assert!(handle.join().is_err());
    assert_eq!(live_result_records(), 0);
}

extern "C" fn returns_null(_: *mut c_void) -> *mut c_void {
    std::ptr::null_mut()
}

#[test]
fn join_without_a_record_yields_zero_and_one_error() {
    let sink = MemorySink::new();
    // SAFETY: plain data, written by pthread_create.
    let mut t: libc::pthread_t = unsafe { std::mem::zeroed() };
    // SAFETY: default attributes; the routine ignores its argument.
    let rc = unsafe { libc::pthread_create(&mut t, std::ptr::null(), returns_null, std::ptr::null_mut()) };
    assert_eq!(rc, 0);

    // SAFETY: `t` is joinable and joined exactly once.
    assert_eq!(unsafe { thread::join_raw(t, &sink) }, Ok(0));

    let entries = sink.take();
    assert_eq!(entries.len(), 1, "{entries:?}");
    assert_eq!(entries[0].operation, "thrd_join");
    assert_eq!(entries[0].level, Level::Error);
    assert_eq!(entries[0].code, None);
}
