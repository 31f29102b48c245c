//! Thread launch and join over `pthread_t`.
//!
//! A pthread start routine returns `void *`, while a C11 thread body returns
//! `int`. Each spawn therefore allocates a [`ResultRecord`] carrying the
//! entry point in and the result out:
//!
//! ```text
//! spawn          new thread               join
//!   alloc  --->  take entry, run it  --->  pthread_join -> record ptr
//!                store result              read result, free record
//! ```
//!
//! Exactly one side frees a record: the spawner when `pthread_create` fails,
//! the joiner after a successful join, or (for a handle dropped unjoined)
//! whichever of the dropped handle and the finishing thread comes second.

use std::alloc::{self, Layout};
use std::ffi::{c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use c11threads_core::diag::{self, Diagnostic, DiagnosticSink, Level};
use c11threads_core::ThreadError;

use crate::native::report;

pub use crate::native::{sleep_for, sleep_span, yield_now};

const COMPONENT: &str = "thread";

/// C11 thread body: `int (*)(void *)`.
pub type StartRoutine = unsafe extern "C" fn(*mut c_void) -> c_int;

// ---------------------------------------------------------------------------
// Result record
// ---------------------------------------------------------------------------

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const DETACHED: u8 = 2;

static LIVE_RECORDS: AtomicUsize = AtomicUsize::new(0);

/// Result records currently allocated in this process.
#[doc(hidden)]
#[must_use]
pub fn live_result_records() -> usize {
    LIVE_RECORDS.load(Ordering::SeqCst)
}

enum Entry {
    C { func: StartRoutine, arg: *mut c_void },
    Rust(Box<dyn FnOnce() -> c_int + Send>),
}

impl Entry {
    fn run(self) -> c_int {
        match self {
            // SAFETY: `thrd_create`'s caller vouched for `func` and `arg`.
            Self::C { func, arg } => unsafe { func(arg) },
            Self::Rust(body) => body(),
        }
    }
}

/// Heap record handed from the spawner to the new thread and back to the
/// joiner.
struct ResultRecord {
    entry: Option<Entry>,
    result: c_int,
    panicked: bool,
    state: AtomicU8,
}

impl ResultRecord {
    /// Allocates with an explicit null check so exhaustion surfaces as
    /// `ResourceExhausted` instead of aborting.
    fn allocate(entry: Entry) -> Result<NonNull<Self>, ThreadError> {
        let layout = Layout::new::<Self>();
        // SAFETY: `ResultRecord` is not zero-sized.
        let raw = unsafe { alloc::alloc(layout) }.cast::<Self>();
        let Some(record) = NonNull::new(raw) else {
            return Err(ThreadError::ResourceExhausted {
                operation: "thrd_create",
            });
        };
        // SAFETY: fresh allocation of the right layout.
        unsafe {
            record.as_ptr().write(Self {
                entry: Some(entry),
                result: 0,
                panicked: false,
                state: AtomicU8::new(RUNNING),
            });
        }
        LIVE_RECORDS.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    /// # Safety
    ///
    /// `record` came from [`allocate`](Self::allocate), is not freed yet, and
    /// no other party touches it again.
    unsafe fn free(record: NonNull<Self>) {
        // `Box` and `alloc` agree on the layout of a sized `T`.
        // SAFETY: forwarded caller contract.
        drop(unsafe { Box::from_raw(record.as_ptr()) });
        LIVE_RECORDS.fetch_sub(1, Ordering::SeqCst);
    }

    /// Borrows only the handoff word, never the whole record: the other
    /// side may be writing `result` or freeing the record concurrently.
    ///
    /// # Safety
    ///
    /// `record` is live for as long as the returned borrow is used.
    unsafe fn state<'a>(record: NonNull<Self>) -> &'a AtomicU8 {
        // SAFETY: forwarded caller contract.
        unsafe { &(*record.as_ptr()).state }
    }
}

extern "C" fn trampoline(data: *mut c_void) -> *mut c_void {
    let Some(record) = NonNull::new(data.cast::<ResultRecord>()) else {
        return ptr::null_mut();
    };
    // SAFETY: the spawner handed this thread a live record; only this thread
    // touches `entry`, `result` and `panicked` until `state` is published.
    let entry = unsafe { (*record.as_ptr()).entry.take() };
    let outcome = match entry {
        Some(entry) => panic::catch_unwind(AssertUnwindSafe(|| entry.run())),
        None => Ok(0),
    };
    // SAFETY: as above.
    unsafe {
        match outcome {
            Ok(value) => (*record.as_ptr()).result = value,
            Err(_) => (*record.as_ptr()).panicked = true,
        }
    }

    // SAFETY: still live: the record is freed only after this swap.
    let prev = unsafe { ResultRecord::state(record) }.swap(FINISHED, Ordering::AcqRel);
    if prev == DETACHED {
        // SAFETY: the handle was dropped and gave up the record.
        unsafe { ResultRecord::free(record) };
        return ptr::null_mut();
    }
    data
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identity of a thread of control.
#[derive(Clone, Copy)]
pub struct ThreadId(libc::pthread_t);

impl ThreadId {
    #[must_use]
    pub fn as_raw(self) -> libc::pthread_t {
        self.0
    }

    #[must_use]
    pub fn from_raw(raw: libc::pthread_t) -> Self {
        Self(raw)
    }
}

impl PartialEq for ThreadId {
    fn eq(&self, other: &Self) -> bool {
        // SAFETY: pthread_equal only compares the two values.
        unsafe { libc::pthread_equal(self.0, other.0) != 0 }
    }
}

impl Eq for ThreadId {}

impl std::fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ThreadId").field(&(self.0 as usize)).finish()
    }
}

/// The calling thread.
#[must_use]
pub fn current() -> ThreadId {
    // SAFETY: pthread_self cannot fail.
    ThreadId(unsafe { libc::pthread_self() })
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// A spawned thread that has not been joined.
///
/// Dropping the handle detaches the thread; its result is then discarded.
pub struct ThreadHandle {
    thread: libc::pthread_t,
    record: Option<NonNull<ResultRecord>>,
    sink: Arc<dyn DiagnosticSink>,
}

// SAFETY: the record is only touched through the state protocol above, and
// any thread may join or detach a pthread.
unsafe impl Send for ThreadHandle {}

impl ThreadHandle {
    #[must_use]
    pub fn id(&self) -> ThreadId {
        ThreadId(self.thread)
    }

    /// Waits for the thread to finish and returns its result.
    pub fn join(mut self) -> Result<c_int, ThreadError> {
        let Some(record) = self.record.take() else {
            return Ok(0);
        };
        let mut retval: *mut c_void = ptr::null_mut();
        // SAFETY: `thread` is joinable: it has been neither joined nor detached.
        let rc = unsafe { libc::pthread_join(self.thread, &mut retval) };
        if rc != 0 {
            report(&*self.sink, Level::Error, COMPONENT, "pthread_join", rc);
            // Still unjoined; the drop detaches it.
            self.record = Some(record);
            return Err(ThreadError::JoinFailure {
                operation: "pthread_join",
                code: rc,
            });
        }

        if retval.cast::<ResultRecord>() != record.as_ptr() {
            // The body left through pthread_exit or cancellation and never
            // handed the record back.
            // SAFETY: joined, so this handle is the record's only owner.
            unsafe { ResultRecord::free(record) };
            report_missing_record(&*self.sink);
            return Ok(0);
        }
        // SAFETY: the joined thread handed the record back.
        unsafe { take_result(record, &*self.sink) }
    }

    /// Gives up the handle without detaching. The thread must later be
    /// passed to [`join_raw`], which recovers the result record.
    #[must_use]
    pub fn into_raw(self) -> libc::pthread_t {
        let mut this = std::mem::ManuallyDrop::new(self);
        // The record now travels only through the thread's exit value.
        this.record = None;
        // SAFETY: `this` is never used or dropped again.
        drop(unsafe { ptr::read(&this.sink) });
        this.thread
    }
}

/// Joins a thread released by [`ThreadHandle::into_raw`].
///
/// A thread that exited without handing back its record yields 0 and an
/// error diagnostic.
///
/// # Safety
///
/// `thread` came from [`ThreadHandle::into_raw`] and has not been joined,
/// and its body did not call `pthread_exit` with a non-null value.
pub unsafe fn join_raw(thread: libc::pthread_t, sink: &dyn DiagnosticSink) -> Result<c_int, ThreadError> {
    let mut retval: *mut c_void = ptr::null_mut();
    // SAFETY: forwarded caller contract.
    let rc = unsafe { libc::pthread_join(thread, &mut retval) };
    if rc != 0 {
        report(sink, Level::Error, COMPONENT, "pthread_join", rc);
        return Err(ThreadError::JoinFailure {
            operation: "pthread_join",
            code: rc,
        });
    }
    match NonNull::new(retval.cast::<ResultRecord>()) {
        // SAFETY: per the caller contract only the trampoline produces a
        // non-null exit value.
        Some(record) => unsafe { take_result(record, sink) },
        None => {
            report_missing_record(sink);
            Ok(0)
        }
    }
}

/// Reads and frees a record handed back by a joined thread.
///
/// # Safety
///
/// The thread owning `record` has been joined and returned it.
unsafe fn take_result(record: NonNull<ResultRecord>, sink: &dyn DiagnosticSink) -> Result<c_int, ThreadError> {
    // SAFETY: the thread is gone; the caller is the only owner.
    let (result, panicked) = unsafe {
        let r = record.as_ref();
        (r.result, r.panicked)
    };
    // SAFETY: as above.
    unsafe { ResultRecord::free(record) };
    if panicked {
        sink.report(&Diagnostic::anomaly(
            Level::Error,
            COMPONENT,
            "thrd_join",
            "thread entry point panicked",
        ));
        return Err(ThreadError::EntryPanicked);
    }
    Ok(result)
}

fn report_missing_record(sink: &dyn DiagnosticSink) {
    sink.report(&Diagnostic::anomaly(
        Level::Error,
        COMPONENT,
        "thrd_join",
        "joined thread returned no result record; reporting 0",
    ));
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        let Some(record) = self.record.take() else {
            return;
        };
        // SAFETY: `thread` is joinable: it has been neither joined nor detached.
        let rc = unsafe { libc::pthread_detach(self.thread) };
        if rc != 0 {
            report(&*self.sink, Level::Warn, COMPONENT, "pthread_detach", rc);
        }
        // SAFETY: the record stays live until both sides have swapped.
        let prev = unsafe { ResultRecord::state(record) }.swap(DETACHED, Ordering::AcqRel);
        if prev == FINISHED {
            // SAFETY: the thread already finished and handed the record over.
            unsafe { ResultRecord::free(record) };
        }
    }
}

impl std::fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

struct ThreadAttr<'a> {
    raw: libc::pthread_attr_t,
    sink: &'a dyn DiagnosticSink,
}

impl<'a> ThreadAttr<'a> {
    fn with_stack_size(size: usize, sink: &'a dyn DiagnosticSink) -> Result<Self, ThreadError> {
        let mut attr = ThreadAttr {
            // SAFETY: plain data, overwritten by pthread_attr_init below.
            raw: unsafe { std::mem::zeroed() },
            sink,
        };
        // SAFETY: `attr.raw` is valid storage.
        let rc = unsafe { libc::pthread_attr_init(&mut attr.raw) };
        if rc != 0 {
            report(sink, Level::Error, COMPONENT, "pthread_attr_init", rc);
            std::mem::forget(attr);
            return Err(creation_error("pthread_attr_init", rc));
        }
        // SAFETY: initialized above.
        let rc = unsafe { libc::pthread_attr_setstacksize(&mut attr.raw, size) };
        if rc != 0 {
            report(sink, Level::Error, COMPONENT, "pthread_attr_setstacksize", rc);
            return Err(creation_error("pthread_attr_setstacksize", rc));
        }
        Ok(attr)
    }
}

impl Drop for ThreadAttr<'_> {
    fn drop(&mut self) {
        // SAFETY: only initialized values are dropped.
        let rc = unsafe { libc::pthread_attr_destroy(&mut self.raw) };
        if rc != 0 {
            report(self.sink, Level::Warn, COMPONENT, "pthread_attr_destroy", rc);
        }
    }
}

fn creation_error(operation: &'static str, code: i32) -> ThreadError {
    if code == libc::ENOMEM {
        ThreadError::ResourceExhausted { operation }
    } else {
        ThreadError::CreationFailure { operation, code }
    }
}

/// Thread spawn options.
#[derive(Default)]
pub struct Builder {
    sink: Option<Arc<dyn DiagnosticSink>>,
    stack_size: Option<usize>,
}

impl Builder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink for diagnostics from this thread's spawn, join and detach.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn spawn<F>(self, body: F) -> Result<ThreadHandle, ThreadError>
    where
        F: FnOnce() -> c_int + Send + 'static,
    {
        self.spawn_entry(Entry::Rust(Box::new(body)))
    }

    /// Starts `func(arg)` on a new thread.
    ///
    /// # Safety
    ///
    /// `func` must be safe to call with `arg` on another thread, and must
    /// not unwind.
    pub unsafe fn spawn_raw(
        self,
        func: StartRoutine,
        arg: *mut c_void,
    ) -> Result<ThreadHandle, ThreadError> {
        self.spawn_entry(Entry::C { func, arg })
    }

    fn spawn_entry(self, entry: Entry) -> Result<ThreadHandle, ThreadError> {
        let sink = self.sink.unwrap_or_else(diag::default_sink);
        let attr = match self.stack_size {
            Some(size) => Some(ThreadAttr::with_stack_size(size, &*sink)?),
            None => None,
        };

        let record = ResultRecord::allocate(entry).inspect_err(|err| {
            sink.report(&Diagnostic::anomaly(
                Level::Error,
                COMPONENT,
                "thrd_create",
                err.to_string(),
            ));
        })?;

        // SAFETY: plain data, written by pthread_create.
        let mut thread: libc::pthread_t = unsafe { std::mem::zeroed() };
        let attr_ptr = attr
            .as_ref()
            .map_or(ptr::null(), |a| &a.raw as *const libc::pthread_attr_t);
        // SAFETY: `record` is live and handed to the new thread; `attr_ptr`
        // is null or an initialized attribute object.
        let rc = unsafe {
            libc::pthread_create(&mut thread, attr_ptr, trampoline, record.as_ptr().cast())
        };
        drop(attr);
        if rc != 0 {
            // No thread took the record.
            // SAFETY: sole owner.
            unsafe { ResultRecord::free(record) };
            report(&*sink, Level::Error, COMPONENT, "pthread_create", rc);
            return Err(ThreadError::CreationFailure {
                operation: "pthread_create",
                code: rc,
            });
        }

        Ok(ThreadHandle {
            thread,
            record: Some(record),
            sink,
        })
    }
}

/// Spawns `body` on a new thread with default options.
pub fn spawn<F>(body: F) -> Result<ThreadHandle, ThreadError>
where
    F: FnOnce() -> c_int + Send + 'static,
{
    Builder::new().spawn(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use c11threads_core::diag::MemorySink;
    use std::sync::atomic::AtomicBool;
    use std::time::{Duration, Instant};

    #[test]
    fn spawn_join_returns_body_value() {
        let handle = spawn(|| 42).unwrap();
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn negative_results_survive_transport() {
        assert_eq!(spawn(|| -7).unwrap().join().unwrap(), -7);
    }

    #[test]
    fn panicking_body_reports_entry_panicked() {
        let sink = Arc::new(MemorySink::new());
        let handle = Builder::new()
            .sink(sink.clone())
            .spawn(|| panic!("boom"))
            .unwrap();
        assert_eq!(handle.join(), Err(ThreadError::EntryPanicked));
        assert_eq!(sink.entries()[0].operation, "thrd_join");
    }

    #[test]
    fn stack_size_is_applied() {
        let handle = Builder::new()
            .stack_size(256 * 1024)
            .spawn(|| 5)
            .unwrap();
        assert_eq!(handle.join().unwrap(), 5);
    }

    #[test]
    fn bad_stack_size_is_creation_failure() {
        let sink = Arc::new(MemorySink::new());
        let err = Builder::new()
            .sink(sink.clone())
            .stack_size(1)
            .spawn(|| 0)
            .unwrap_err();
        assert!(matches!(err, ThreadError::CreationFailure { code, .. } if code == libc::EINVAL));
        assert_eq!(sink.entries()[0].operation, "pthread_attr_setstacksize");
    }

    #[test]
    fn current_differs_from_spawned_thread() {
        let me = current();
        assert_eq!(me, current());
        let handle = spawn(move || i32::from(current() == me)).unwrap();
        let child = handle.id();
        assert_ne!(child, me);
        assert_eq!(handle.join().unwrap(), 0);
    }

    #[test]
    fn dropped_handle_detaches_and_thread_still_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        drop(spawn(move || {
            flag.store(true, Ordering::SeqCst);
            0
        })
        .unwrap());
        let deadline = Instant::now() + Duration::from_secs(5);
        while !ran.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline);
            yield_now();
        }
    }

    #[test]
    fn handles_dropped_while_bodies_finish() {
        const N: usize = 500;
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..N {
            let done = Arc::clone(&done);
            // Body and handle drop race for the handoff word.
            drop(spawn(move || {
                done.fetch_add(1, Ordering::SeqCst);
                0
            })
            .unwrap());
        }
        let deadline = Instant::now() + Duration::from_secs(10);
        while done.load(Ordering::SeqCst) < N {
            assert!(Instant::now() < deadline);
            yield_now();
        }
    }
}
