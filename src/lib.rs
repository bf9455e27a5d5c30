//! Record/replay interception for expensive or non-deterministic calls.
//!
//! Wrap a function with an [`Interceptor`], record its results once, and play
//! them back from a durable storage file afterwards:
//!
//! ```no_run
//! use repro_cache::{Interceptor, Mode, Value};
//!
//! let interceptor = Interceptor::new("fixtures/calls.json");
//! let add = interceptor.wrap(|args: &[Value]| -> Result<Value, String> {
//!     let a = args[0].as_i64().unwrap_or_default();
//!     let b = args[1].as_i64().unwrap_or_default();
//!     Ok(Value::from(a + b))
//! });
//!
//! interceptor.set_mode(Mode::Record);
//! add.call(&[Value::from(2), Value::from(3)]).unwrap();
//! interceptor.flush();
//!
//! interceptor.set_mode(Mode::Playback);
//! assert_eq!(add.call(&[Value::from(2), Value::from(3)]).unwrap(), Value::from(5));
//! ```

pub mod config;
pub mod repro;
pub mod util;
pub mod value;

pub use config::InterceptorConfig;
pub use repro::{
    Diagnostic, DiagnosticSink, EncodeError, InterceptError, Interceptor, LoadError,
    MemorySink, Mode, Store, TracingSink, Wrapped, WrappedAsync,
};
pub use value::{Callable, Deferred, Encodable, ErrorValue, ExecutionError, Pattern, Value};
