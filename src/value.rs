//! Dynamic value model for intercepted arguments and results.
//!
//! Containers are shared nodes so a value graph can alias and even point back
//! at itself, the same way a caller's object graph can. Node identity is the
//! address of the shared allocation, which is what cycle detection keys on.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// A reference-counted, interior-mutable container node.
pub type Shared<T> = Arc<RwLock<T>>;

pub(crate) fn shared<T>(inner: T) -> Shared<T> {
    Arc::new(RwLock::new(inner))
}

/// Every value the interceptor can see as an argument or a result.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Shared<Vec<Value>>),
    /// String-keyed mapping, kept in insertion order.
    Object(Shared<Vec<(String, Value)>>),
    /// Ordered collection of unique elements.
    Set(Shared<Vec<Value>>),
    /// Ordered key/value collection with arbitrary keys.
    Map(Shared<Vec<(Value, Value)>>),
    Date(DateTime<Utc>),
    RegExp(Pattern),
    Error(ErrorValue),
    Function(Callable),
    Promise(Deferred),
    /// Application type that knows how to turn itself into a plain value.
    Custom(Arc<dyn Encodable>),
}

/// Application-defined conversion into an encodable [`Value`].
///
/// Returning an error marks the value as unsupported; the encoder reports it
/// instead of writing a partial result.
pub trait Encodable: Send + Sync {
    fn type_name(&self) -> &str;

    fn to_value(&self) -> Result<Value, String>;
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(shared(items))
    }

    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let value = Value::Object(shared(Vec::new()));
        for (key, field) in fields {
            value.insert(key, field);
        }
        value
    }

    /// Build a set, dropping elements equal to one already present.
    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        let mut unique: Vec<Value> = Vec::new();
        for item in items {
            if !unique.contains(&item) {
                unique.push(item);
            }
        }
        Value::Set(shared(unique))
    }

    pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let map = Value::Map(shared(Vec::new()));
        for (key, value) in entries {
            map.insert_entry(key, value);
        }
        map
    }

    pub fn custom(inner: impl Encodable + 'static) -> Self {
        Value::Custom(Arc::new(inner))
    }

    /// Insert or replace a field on an object. Returns false for non-objects.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> bool {
        let Value::Object(node) = self else {
            return false;
        };
        let key = key.into();
        let mut fields = node.write();
        match fields.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => fields.push((key, value)),
        }
        true
    }

    /// Insert or replace an entry on a map. Returns false for non-maps.
    pub fn insert_entry(&self, key: Value, value: Value) -> bool {
        let Value::Map(node) = self else {
            return false;
        };
        let mut entries = node.write();
        match entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => entries.push((key, value)),
        }
        true
    }

    /// Append to an array. Returns false for non-arrays.
    pub fn push(&self, value: Value) -> bool {
        let Value::Array(node) = self else {
            return false;
        };
        node.write().push(value);
        true
    }

    /// Field lookup on an object, or index lookup on an array.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(node) => node
                .read()
                .iter()
                .find(|(existing, _)| existing == key)
                .map(|(_, value)| value.clone()),
            Value::Array(node) => {
                let index: usize = key.parse().ok()?;
                node.read().get(index).cloned()
            }
            _ => None,
        }
    }

    /// Number of elements in a container; `None` for scalars.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Array(node) | Value::Set(node) => Some(node.read().len()),
            Value::Object(node) => Some(node.read().len()),
            Value::Map(node) => Some(node.read().len()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Identity comparison: true when both values are the same node.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self.node_id(), other.node_id()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Address of the shared allocation backing a container.
    pub(crate) fn node_id(&self) -> Option<usize> {
        match self {
            Value::Array(node) | Value::Set(node) => Some(Arc::as_ptr(node) as *const () as usize),
            Value::Object(node) => Some(Arc::as_ptr(node) as *const () as usize),
            Value::Map(node) => Some(Arc::as_ptr(node) as *const () as usize),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Set(_) => "Set",
            Value::Map(_) => "Map",
            Value::Date(_) => "Date",
            Value::RegExp(_) => "RegExp",
            Value::Error(_) => "Error",
            Value::Function(_) => "Function",
            Value::Promise(_) => "Promise",
            Value::Custom(_) => "custom",
        }
    }
}

/// Structural equality. Identical nodes compare equal without a walk; two
/// distinct cyclic graphs are not supported.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) | (Value::Set(a), Value::Set(b)) => {
                Arc::ptr_eq(a, b) || *a.read_recursive() == *b.read_recursive()
            }
            (Value::Object(a), Value::Object(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.read_recursive(), b.read_recursive());
                a.len() == b.len()
                    && a.iter().all(|(key, value)| {
                        b.iter()
                            .find(|(other, _)| other == key)
                            .is_some_and(|(_, other)| value == other)
                    })
            }
            (Value::Map(a), Value::Map(b)) => {
                Arc::ptr_eq(a, b) || *a.read_recursive() == *b.read_recursive()
            }
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::RegExp(a), Value::RegExp(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.name == b.name,
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            (Value::Custom(a), Value::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match crate::repro::codec::encode_json(self) {
            Ok(json) => write!(f, "{json}"),
            Err(err) => write!(f, "<{} value: {err}>", self.kind()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Date(value)
    }
}

impl From<Pattern> for Value {
    fn from(value: Pattern) -> Self {
        Value::RegExp(value)
    }
}

impl From<ErrorValue> for Value {
    fn from(value: ErrorValue) -> Self {
        Value::Error(value)
    }
}

impl From<Callable> for Value {
    fn from(value: Callable) -> Self {
        Value::Function(value)
    }
}

impl From<Deferred> for Value {
    fn from(value: Deferred) -> Self {
        Value::Promise(value)
    }
}

/// A regular expression kept as source text plus single-letter flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    flags: String,
}

impl Pattern {
    pub fn new(source: impl Into<String>, flags: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            flags: flags.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn flags(&self) -> &str {
        &self.flags
    }

    /// Compile into a [`Regex`]. Only `i`, `m`, `s` and `x` change matching;
    /// other flags are carried through untouched.
    pub fn compile(&self) -> Result<Regex, regex::Error> {
        let mut builder = RegexBuilder::new(&self.source);
        for flag in self.flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'x' => {
                    builder.ignore_whitespace(true);
                }
                _ => {}
            }
        }
        builder.build()
    }

    pub fn is_match(&self, haystack: &str) -> Result<bool, regex::Error> {
        Ok(self.compile()?.is_match(haystack))
    }
}

/// An error captured as data: what it was called, what it said, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

impl ErrorValue {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Capture an error and its source chain.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let chain: Vec<String> = std::iter::successors(err.source(), |e| e.source())
            .map(|cause| format!("caused by: {cause}"))
            .collect();
        Self {
            name: "Error".to_string(),
            message: err.to_string(),
            stack: (!chain.is_empty()).then(|| chain.join("\n")),
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for ErrorValue {}

/// Failures raised by callables and deferred computations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("function `{name}` was restored from a recording and cannot be invoked")]
    Placeholder { name: String },
    #[error("cannot restore a pending computation from a recording")]
    CannotRestore,
    #[error("deferred computation has already been settled")]
    AlreadySettled,
    #[error("{0}")]
    Failed(ErrorValue),
}

type CallableBody = dyn Fn(&[Value]) -> Result<Value, ExecutionError> + Send + Sync;

/// A named callable. Only the name survives a recording.
#[derive(Clone)]
pub struct Callable {
    name: String,
    body: Arc<CallableBody>,
}

impl Callable {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ExecutionError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(body),
        }
    }

    /// Stand-in for a callable read back from storage.
    pub(crate) fn placeholder(name: impl Into<String>) -> Self {
        let name = name.into();
        let label = name.clone();
        Self::new(name, move |_| {
            Err(ExecutionError::Placeholder {
                name: label.clone(),
            })
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, ExecutionError> {
        (self.body)(args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable").field("name", &self.name).finish()
    }
}

enum DeferredState {
    Pending(BoxFuture<'static, Result<Value, ExecutionError>>),
    Settled,
}

/// A computation that resolves later. It can be settled exactly once.
#[derive(Clone)]
pub struct Deferred {
    state: Arc<Mutex<DeferredState>>,
}

impl Deferred {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, ExecutionError>> + Send + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(DeferredState::Pending(future.boxed()))),
        }
    }

    pub fn rejected(err: ExecutionError) -> Self {
        Self::new(async move { Err(err) })
    }

    /// Stand-in for a pending computation read back from storage.
    pub(crate) fn unrestorable() -> Self {
        Self::rejected(ExecutionError::CannotRestore)
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), DeferredState::Pending(_))
    }

    /// Drive the computation to completion.
    pub async fn settle(&self) -> Result<Value, ExecutionError> {
        let state = std::mem::replace(&mut *self.state.lock(), DeferredState::Settled);
        match state {
            DeferredState::Pending(future) => future.await,
            DeferredState::Settled => Err(ExecutionError::AlreadySettled),
        }
    }

    pub fn ptr_eq(&self, other: &Deferred) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("pending", &self.is_pending())
            .finish()
    }
}
