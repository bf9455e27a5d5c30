//! Diagnostic sink for recovered failures.
//!
//! Corruption recovery, skipped recordings and persistence failures never
//! reach the caller of a wrapped function. They are reported here instead.

use std::fmt;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::repro::error::CorruptionError;
use crate::repro::fingerprint::Fingerprint;

#[derive(Debug, Clone)]
pub enum Diagnostic {
    /// The storage file failed to parse and was moved aside.
    Corruption {
        error: CorruptionError,
        backup: PathBuf,
    },
    /// A Record-mode result was returned to the caller but not stored.
    RecordSkipped {
        fingerprint: Option<Fingerprint>,
        reason: String,
    },
    /// The in-memory mapping could not be encoded; the file was left alone.
    PersistAborted { path: PathBuf, reason: String },
    /// Writing or renaming the storage file failed.
    PersistFailed { path: PathBuf, reason: String },
    BackgroundTaskFailed { reason: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Corruption { error, backup } => {
                write!(f, "{error}; moved to {}", backup.display())
            }
            Diagnostic::RecordSkipped {
                fingerprint: Some(fingerprint),
                reason,
            } => write!(f, "result for {fingerprint} not recorded: {reason}"),
            Diagnostic::RecordSkipped {
                fingerprint: None,
                reason,
            } => write!(f, "result not recorded: {reason}"),
            Diagnostic::PersistAborted { path, reason } => {
                write!(f, "persist of {} aborted: {reason}", path.display())
            }
            Diagnostic::PersistFailed { path, reason } => {
                write!(f, "persist of {} failed: {reason}", path.display())
            }
            Diagnostic::BackgroundTaskFailed { reason } => {
                write!(f, "background storage task failed: {reason}")
            }
        }
    }
}

pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Default sink: every diagnostic becomes a `tracing` warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::Corruption { error, backup } => {
                tracing::warn!(
                    path = %error.path.display(),
                    backup = %backup.display(),
                    error = %error.source,
                    "Recovered from corrupt storage file"
                );
            }
            Diagnostic::RecordSkipped {
                fingerprint,
                reason,
            } => {
                tracing::warn!(
                    fingerprint = fingerprint.as_ref().map(Fingerprint::as_str),
                    reason = %reason,
                    "Skipped recording call result"
                );
            }
            Diagnostic::PersistAborted { path, reason } => {
                tracing::warn!(path = %path.display(), reason = %reason, "Aborted storage persist");
            }
            Diagnostic::PersistFailed { path, reason } => {
                tracing::warn!(path = %path.display(), reason = %reason, "Failed to persist storage file");
            }
            Diagnostic::BackgroundTaskFailed { reason } => {
                tracing::warn!(reason = %reason, "Background storage task failed");
            }
        }
    }
}

/// Sink that keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().clone()
    }

    /// Drain everything reported so far.
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.diagnostics.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.lock().is_empty()
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, diagnostic: Diagnostic) {
        tracing::debug!(diagnostic = %diagnostic, "Captured diagnostic");
        self.diagnostics.lock().push(diagnostic);
    }
}
