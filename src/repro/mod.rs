//! Record/replay call interception.
//!
//! This module is scoped to the building blocks needed to:
//! - fingerprint a call's arguments
//! - encode results (including values plain JSON cannot hold) to durable text
//! - keep those results in a single storage file that survives corruption
//! - dispatch wrapped calls in bypass, record or playback mode

pub mod codec;
pub mod diagnostics;
pub mod error;
pub mod fingerprint;
pub mod interceptor;
pub mod mode;
pub mod store;

pub use diagnostics::{Diagnostic, DiagnosticSink, MemorySink, TracingSink};
pub use error::{
    ConfigError, CorruptionError, DecodeError, EncodeError, InterceptError, LoadError,
    PersistError,
};
pub use fingerprint::{fingerprint, Fingerprint};
pub use interceptor::{Interceptor, Wrapped, WrappedAsync};
pub use mode::Mode;
pub use store::{Snapshot, Store};
