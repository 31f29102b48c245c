//! Structured diagnostics for native-primitive failures.
//!
//! The threading layer never prints. Each native error is turned into a
//! [`Diagnostic`] and handed to a [`DiagnosticSink`]; the application decides
//! where it goes. Handles accept an injected sink, and fall back to the
//! process default otherwise (JSONL on stderr unless replaced).

use std::io::Write;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

/// Severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Warn,
    Error,
}

/// One diagnostic record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub level: Level,
    /// `mutex`, `cond` or `thread`.
    pub component: &'static str,
    /// The native call or layer operation that failed.
    pub operation: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    pub description: String,
}

impl Diagnostic {
    /// A native call returned `code`.
    #[must_use]
    pub fn native(level: Level, component: &'static str, operation: &'static str, code: i32) -> Self {
        Self {
            level,
            component,
            operation,
            code: Some(code),
            description: std::io::Error::from_raw_os_error(code).to_string(),
        }
    }

    /// Something went wrong that has no native code attached.
    #[must_use]
    pub fn anomaly(
        level: Level,
        component: &'static str,
        operation: &'static str,
        description: impl Into<String>,
    ) -> Self {
        Self {
            level,
            component,
            operation,
            code: None,
            description: description.into(),
        }
    }

    /// Renders as a single JSON line (no trailing newline).
    #[must_use]
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"level\":\"error\",\"component\":\"{}\",\"operation\":\"{}\"}}",
                self.component, self.operation
            )
        })
    }
}

/// Receiver for diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: &Diagnostic);
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Writes one JSON object per line to the wrapped writer.
pub struct JsonLineSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLineSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl JsonLineSink<std::io::Stderr> {
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> DiagnosticSink for JsonLineSink<W> {
    fn report(&self, diagnostic: &Diagnostic) {
        let line = diagnostic.to_json_line();
        let mut out = self.out.lock();
        // Nowhere left to report a failing diagnostics stream.
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

/// Keeps every diagnostic in memory.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.lock().clone()
    }

    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.entries.lock())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, diagnostic: &Diagnostic) {
        self.entries.lock().push(diagnostic.clone());
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn report(&self, _diagnostic: &Diagnostic) {}
}

// ---------------------------------------------------------------------------
// Process default
// ---------------------------------------------------------------------------

fn default_slot() -> &'static RwLock<Arc<dyn DiagnosticSink>> {
    static SLOT: OnceLock<RwLock<Arc<dyn DiagnosticSink>>> = OnceLock::new();
    SLOT.get_or_init(|| RwLock::new(Arc::new(JsonLineSink::stderr())))
}

/// The sink used by handles created without one.
#[must_use]
pub fn default_sink() -> Arc<dyn DiagnosticSink> {
    Arc::clone(&default_slot().read())
}

/// Replaces the process default sink. Handles already created keep the
/// sink they captured.
pub fn set_default_sink(sink: Arc<dyn DiagnosticSink>) {
    *default_slot().write() = sink;
}
