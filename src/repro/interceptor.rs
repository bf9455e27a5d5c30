//! Call interception.
//!
//! An [`Interceptor`] owns one [`Store`] and one [`Mode`]. Functions wrapped
//! by it are dispatched on the mode current at call time:
//!
//! - `Bypass` calls straight through.
//! - `Record` calls through, then stores and persists a successful result.
//! - `Playback` answers from the store without calling.
//!
//! Synchronous wrappers persist on a detached thread, so the caller gets its
//! result without waiting for the disk. Such a write is only observable
//! through the file itself (after [`Interceptor::flush`]) and through the
//! diagnostic sink; it never changes what the call returned. Asynchronous
//! wrappers await the write before resolving. Inside a tokio runtime their
//! file I/O runs on the blocking pool; under any other executor it runs
//! inline.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;

use crate::config::InterceptorConfig;
use crate::repro::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
use crate::repro::error::{ConfigError, EncodeError, InterceptError, LoadError};
use crate::repro::fingerprint::{self, Fingerprint};
use crate::repro::mode::Mode;
use crate::repro::store::{Snapshot, Store};
use crate::value::Value;

struct Inner {
    mode: RwLock<Mode>,
    store: Arc<Store>,
    sink: Arc<dyn DiagnosticSink>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Interceptor {
    inner: Arc<Inner>,
}

impl Interceptor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_sink(path, Arc::new(TracingSink))
    }

    pub fn with_sink(path: impl Into<PathBuf>, sink: Arc<dyn DiagnosticSink>) -> Self {
        let store = Arc::new(Store::with_sink(path, Arc::clone(&sink)));
        Self {
            inner: Arc::new(Inner {
                mode: RwLock::new(Mode::default()),
                store,
                sink,
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn from_config(config: &InterceptorConfig) -> Self {
        let interceptor = Self::new(config.path.clone());
        interceptor.set_mode(config.mode);
        interceptor
    }

    pub fn mode(&self) -> Mode {
        *self.inner.mode.read()
    }

    /// Switch modes. Takes effect on the next call.
    pub fn set_mode(&self, mode: Mode) {
        *self.inner.mode.write() = mode;
        tracing::debug!(mode = %mode, path = %self.inner.store.path().display(), "Intercept mode set");
    }

    /// Switch modes by name, rejecting anything that is not a known mode.
    pub fn set_mode_str(&self, name: &str) -> Result<(), ConfigError> {
        self.set_mode(name.parse()?);
        Ok(())
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Wrap a synchronous function.
    pub fn wrap<F>(&self, f: F) -> Wrapped<F> {
        Wrapped {
            interceptor: self.clone(),
            f,
        }
    }

    /// Wrap a function returning a future.
    pub fn wrap_async<F>(&self, f: F) -> WrappedAsync<F> {
        WrappedAsync {
            interceptor: self.clone(),
            f,
        }
    }

    /// Block until every detached persist started so far has finished.
    pub fn flush(&self) {
        let handles = std::mem::take(&mut *self.inner.background.lock());
        for handle in handles {
            if handle.join().is_err() {
                self.report(Diagnostic::BackgroundTaskFailed {
                    reason: "persist thread panicked".to_string(),
                });
            }
        }
    }

    fn report(&self, diagnostic: Diagnostic) {
        self.inner.sink.report(diagnostic);
    }

    /// Store a successful result and snapshot the mapping. Returns `None`
    /// when there is nothing to write; the reason has been reported.
    fn record(&self, key: Result<Fingerprint, EncodeError>, result: &Value) -> Option<Snapshot> {
        let fingerprint = match key {
            Ok(fingerprint) => fingerprint,
            Err(err) => {
                self.report(Diagnostic::RecordSkipped {
                    fingerprint: None,
                    reason: format!("arguments cannot be fingerprinted: {err}"),
                });
                return None;
            }
        };

        if let Err(err) = self.inner.store.set(fingerprint.clone(), result) {
            self.report(Diagnostic::RecordSkipped {
                fingerprint: Some(fingerprint),
                reason: err.to_string(),
            });
            return None;
        }

        tracing::debug!(fingerprint = %fingerprint, "Recorded call result");
        self.inner.store.snapshot().ok()
    }

    fn playback<E>(&self, args: &[Value]) -> Result<Value, InterceptError<E>> {
        let canonical = fingerprint::canonical_args(args).map_err(InterceptError::Fingerprint)?;
        let fingerprint = Fingerprint::of_canonical(&canonical);
        match self.inner.store.get(&fingerprint) {
            Some(value) => {
                tracing::debug!(fingerprint = %fingerprint, "Played back call result");
                Ok(value)
            }
            None => Err(InterceptError::NotFound { args: canonical }),
        }
    }

    fn persist_detached(&self, snapshot: Snapshot) {
        let store = Arc::clone(&self.inner.store);
        let spawned = thread::Builder::new()
            .name("repro-cache-persist".to_string())
            .spawn(move || {
                // Failures are reported to the sink by the store.
                let _ = store.write_snapshot(snapshot);
            });

        match spawned {
            Ok(handle) => {
                let mut background = self.inner.background.lock();
                background.retain(|handle| !handle.is_finished());
                background.push(handle);
            }
            Err(err) => self.report(Diagnostic::BackgroundTaskFailed {
                reason: format!("failed to spawn persist thread: {err}"),
            }),
        }
    }

    /// Load on tokio's blocking pool, or inline when the future is driven by
    /// another executor.
    async fn load_async(&self) -> Result<(), LoadError> {
        if self.inner.store.is_loaded() {
            return Ok(());
        }
        let store = Arc::clone(&self.inner.store);
        let Ok(runtime) = Handle::try_current() else {
            return store.load();
        };
        runtime
            .spawn_blocking(move || store.load())
            .await
            .map_err(|err| LoadError::Task(err.to_string()))?
    }

    async fn persist_async(&self, snapshot: Snapshot) {
        let store = Arc::clone(&self.inner.store);
        let Ok(runtime) = Handle::try_current() else {
            // Write failures are reported to the sink by the store.
            let _ = store.write_snapshot(snapshot);
            return;
        };
        match runtime
            .spawn_blocking(move || store.write_snapshot(snapshot))
            .await
        {
            Ok(_) => {}
            Err(err) => self.report(Diagnostic::BackgroundTaskFailed {
                reason: err.to_string(),
            }),
        }
    }
}

/// A synchronous function behind an [`Interceptor`].
#[derive(Clone)]
pub struct Wrapped<F> {
    interceptor: Interceptor,
    f: F,
}

impl<F> Wrapped<F> {
    pub fn call<E>(&self, args: &[Value]) -> Result<Value, InterceptError<E>>
    where
        F: Fn(&[Value]) -> Result<Value, E>,
    {
        let interceptor = &self.interceptor;
        match interceptor.mode() {
            Mode::Bypass => (self.f)(args).map_err(InterceptError::Function),
            Mode::Record => {
                interceptor.store().load()?;
                let key = fingerprint::fingerprint(args);
                let result = (self.f)(args).map_err(InterceptError::Function)?;
                if let Some(snapshot) = interceptor.record(key, &result) {
                    interceptor.persist_detached(snapshot);
                }
                Ok(result)
            }
            Mode::Playback => {
                interceptor.store().load()?;
                interceptor.playback(args)
            }
        }
    }

    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }
}

/// An asynchronous function behind an [`Interceptor`].
#[derive(Clone)]
pub struct WrappedAsync<F> {
    interceptor: Interceptor,
    f: F,
}

impl<F> WrappedAsync<F> {
    pub async fn call<Fut, E>(&self, args: Vec<Value>) -> Result<Value, InterceptError<E>>
    where
        F: Fn(Vec<Value>) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        let interceptor = &self.interceptor;
        match interceptor.mode() {
            Mode::Bypass => (self.f)(args).await.map_err(InterceptError::Function),
            Mode::Record => {
                interceptor.load_async().await?;
                let key = fingerprint::fingerprint(&args);
                let result = (self.f)(args).await.map_err(InterceptError::Function)?;
                if let Some(snapshot) = interceptor.record(key, &result) {
                    interceptor.persist_async(snapshot).await;
                }
                Ok(result)
            }
            Mode::Playback => {
                interceptor.load_async().await?;
                interceptor.playback(&args)
            }
        }
    }

    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }
}
