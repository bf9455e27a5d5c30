//! Durable fingerprint → value mapping backed by a single JSON file.
//!
//! The file is read at most once per store (until [`Store::reset`]), entries
//! are held in memory in their encoded form, and every persist replaces the
//! whole file through a temp-file rename.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Map, Value as JsonValue};

use crate::repro::codec;
use crate::repro::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
use crate::repro::error::{CorruptionError, DecodeError, EncodeError, LoadError, PersistError};
use crate::repro::fingerprint::Fingerprint;
use crate::util::paths::{backup_path, temp_path};
use crate::value::Value;

#[derive(Default)]
struct StoreState {
    loaded: bool,
    entries: Map<String, JsonValue>,
    /// Bumped on every mutation; orders snapshots.
    generation: u64,
}

/// Encoded copy of the full mapping, ready to be written.
#[derive(Debug, Clone)]
pub struct Snapshot {
    generation: u64,
    entries: usize,
    text: String,
}

impl Snapshot {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn entries(&self) -> usize {
        self.entries
    }
}

pub struct Store {
    path: PathBuf,
    sink: Arc<dyn DiagnosticSink>,
    state: Mutex<StoreState>,
    /// Generation of the newest snapshot on disk. Held for the whole write so
    /// writers never interleave.
    written: Mutex<Option<u64>>,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_sink(path, Arc::new(TracingSink))
    }

    pub fn with_sink(path: impl Into<PathBuf>, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            path: path.into(),
            sink,
            state: Mutex::new(StoreState::default()),
            written: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    /// Populate the mapping from disk. Only the first call reads the file.
    /// Entries already set in memory win over entries read from disk.
    ///
    /// A missing file is an empty mapping. A file that does not parse is moved
    /// to a backup path and replaced by an empty mapping. Any other read
    /// failure is returned and leaves the store unloaded.
    pub fn load(&self) -> Result<(), LoadError> {
        let mut state = self.state.lock();
        if state.loaded {
            return Ok(());
        }
        let mut entries = self.read_entries()?;
        // Values set before the first load are newer than anything on disk.
        for (key, json) in std::mem::take(&mut state.entries) {
            entries.insert(key, json);
        }
        state.entries = entries;
        state.loaded = true;
        Ok(())
    }

    /// Forget the in-memory mapping so the next [`Store::load`] reads again.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.loaded = false;
        state.entries.clear();
        state.generation += 1;
    }

    fn read_entries(&self) -> Result<Map<String, JsonValue>, LoadError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No storage file yet, starting empty");
                return Ok(Map::new());
            }
            Err(source) => {
                return Err(LoadError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        match parse_entries(&bytes) {
            Ok(entries) => {
                tracing::debug!(
                    path = %self.path.display(),
                    entries = entries.len(),
                    "Loaded storage file"
                );
                Ok(entries)
            }
            Err(source) => {
                self.quarantine(source)?;
                Ok(Map::new())
            }
        }
    }

    fn quarantine(&self, source: DecodeError) -> Result<(), LoadError> {
        let backup = backup_path(&self.path, Utc::now());
        fs::rename(&self.path, &backup).map_err(|err| LoadError::Backup {
            path: self.path.clone(),
            backup: backup.clone(),
            source: err,
        })?;
        self.sink.report(Diagnostic::Corruption {
            error: CorruptionError {
                path: self.path.clone(),
                source,
            },
            backup,
        });
        Ok(())
    }

    /// Look up a stored value. Each call decodes a fresh copy.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Value> {
        let state = self.state.lock();
        let json = state.entries.get(fingerprint.as_str())?;
        codec::decode_json(json).ok()
    }

    /// Store a value in memory. Nothing is written until [`Store::persist`].
    pub fn set(&self, fingerprint: Fingerprint, value: &Value) -> Result<(), EncodeError> {
        let (json, _) = codec::encode_checked(value)?;
        let mut state = self.state.lock();
        state.entries.insert(fingerprint.as_str().to_string(), json);
        state.generation += 1;
        Ok(())
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.state.lock().entries.contains_key(fingerprint.as_str())
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored fingerprints in insertion order.
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.state
            .lock()
            .entries
            .keys()
            .map(|key| Fingerprint::from_stored(key))
            .collect()
    }

    /// Encode the full mapping. A failure is reported and leaves the file
    /// untouched.
    pub fn snapshot(&self) -> Result<Snapshot, EncodeError> {
        let state = self.state.lock();
        match serde_json::to_string_pretty(&state.entries) {
            Ok(text) => Ok(Snapshot {
                generation: state.generation,
                entries: state.entries.len(),
                text,
            }),
            Err(err) => {
                let err = EncodeError::Render(err.to_string());
                self.sink.report(Diagnostic::PersistAborted {
                    path: self.path.clone(),
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Atomically replace the storage file with `snapshot`.
    ///
    /// A snapshot older than the one already on disk is dropped. Failures are
    /// reported to the sink as well as returned.
    pub fn write_snapshot(&self, snapshot: Snapshot) -> Result<(), PersistError> {
        let mut written = self.written.lock();
        if written.is_some_and(|generation| generation > snapshot.generation) {
            tracing::debug!(
                path = %self.path.display(),
                generation = snapshot.generation,
                "Skipping stale snapshot"
            );
            return Ok(());
        }

        match write_atomic(&self.path, &snapshot.text) {
            Ok(()) => {
                *written = Some(snapshot.generation);
                tracing::debug!(
                    path = %self.path.display(),
                    entries = snapshot.entries,
                    "Persisted storage file"
                );
                Ok(())
            }
            Err(err) => {
                self.sink.report(Diagnostic::PersistFailed {
                    path: self.path.clone(),
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Encode and write the mapping in one step.
    pub fn persist(&self) -> Result<(), PersistError> {
        let snapshot = self.snapshot()?;
        self.write_snapshot(snapshot)
    }
}

fn parse_entries(bytes: &[u8]) -> Result<Map<String, JsonValue>, DecodeError> {
    let json: JsonValue =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Syntax(e.to_string()))?;
    let JsonValue::Object(entries) = json else {
        return Err(DecodeError::Syntax(
            "top-level value is not a mapping".to_string(),
        ));
    };
    for entry in entries.values() {
        codec::decode_json(entry)?;
    }
    Ok(entries)
}

fn write_atomic(path: &Path, text: &str) -> Result<(), PersistError> {
    let tmp = temp_path(path);
    let write_err = |source| PersistError::Write {
        path: tmp.clone(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let mut file = File::create(&tmp).map_err(write_err)?;
    file.write_all(text.as_bytes()).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        PersistError::Rename {
            from: tmp.clone(),
            to: path.to_path_buf(),
            source,
        }
    })
}
