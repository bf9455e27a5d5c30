use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A value could not be written in the storage text format.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EncodeError {
    #[error("cannot encode non-finite number {0}")]
    NonFinite(f64),
    #[error("cannot encode value of type `{type_name}`: {reason}")]
    Unsupported { type_name: String, reason: String },
    #[error("value nesting exceeds {limit} levels")]
    TooDeep { limit: usize },
    #[error("encoded value does not decode: {0}")]
    Verification(DecodeError),
    #[error("failed to render encoded value: {0}")]
    Render(String),
}

/// Text could not be read back into a value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed text: {0}")]
    Syntax(String),
    #[error("malformed `{kind}` envelope: {reason}")]
    Envelope { kind: String, reason: String },
}

/// The storage file exists but does not hold a valid recording.
#[derive(Debug, Clone, Error)]
#[error("storage file {} is corrupt: {source}", path.display())]
pub struct CorruptionError {
    pub path: PathBuf,
    #[source]
    pub source: DecodeError,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read storage file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to back up corrupt storage file {} to {}: {source}", path.display(), backup.display())]
    Backup {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("storage load task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to move {} into place at {}: {source}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Invalid mode or configuration input.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown intercept mode `{0}` (expected bypass, record or playback)")]
    UnknownMode(String),
    #[error("failed to parse interceptor config: {0}")]
    Parse(String),
    #[error("failed to read interceptor config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure of a wrapped call.
///
/// `Function` carries the wrapped function's own error untouched. Every other
/// variant originates in the interceptor.
#[derive(Debug, Error)]
pub enum InterceptError<E> {
    #[error("{0}")]
    Function(E),
    #[error("no recorded result for arguments {args}")]
    NotFound { args: String },
    #[error("failed to load recordings: {0}")]
    Load(#[from] LoadError),
    #[error("failed to fingerprint arguments: {0}")]
    Fingerprint(EncodeError),
}

impl<E> InterceptError<E> {
    pub fn is_not_found(&self) -> bool {
        matches!(self, InterceptError::NotFound { .. })
    }

    /// The wrapped function's error, if that is what failed.
    pub fn into_function_error(self) -> Option<E> {
        match self {
            InterceptError::Function(err) => Some(err),
            _ => None,
        }
    }
}
