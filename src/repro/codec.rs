//! Storage text format.
//!
//! Values are written as JSON. Types JSON cannot express natively travel as
//! envelopes: objects tagged with a `__type` discriminator plus the fields
//! needed to rebuild them. Cycles are cut at the edge that closes them and
//! replaced by [`CIRCULAR_MARKER`].
//!
//! A plain object key made of [`TYPE_TAG`] followed only by underscores gains
//! one trailing `_` when written and loses it when read, so user data can
//! never be mistaken for an envelope.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::repro::error::{DecodeError, EncodeError};
use crate::value::{shared, Callable, Deferred, ErrorValue, Pattern, Shared, Value};

pub const TYPE_TAG: &str = "__type";
pub const CIRCULAR_MARKER: &str = "[Circular Reference]";

const ENVELOPE_KINDS: [&str; 7] = [
    "Set", "Map", "Date", "RegExp", "Error", "Function", "Promise",
];

/// Deepest JSON nesting an encoded value may reach. The storage file holds
/// every entry one level below its top-level mapping, and the parser refuses
/// anything nested past 128 levels.
pub const MAX_DEPTH: usize = 126;

/// Custom values whose plain form is again a custom value, at most this many
/// times in a row.
const MAX_CUSTOM_HOPS: usize = 32;

const PROMISE_PENDING: &str = "pending";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "__type")]
enum Envelope {
    Set {
        value: Vec<JsonValue>,
    },
    Map {
        value: Vec<(JsonValue, JsonValue)>,
    },
    Date {
        value: String,
    },
    RegExp {
        source: String,
        flags: String,
    },
    Error {
        name: String,
        message: String,
        stack: Option<String>,
    },
    Function {
        name: String,
    },
    Promise {
        status: String,
    },
}

/// Encode a value to storage text.
///
/// The text is decoded once before it is returned, so anything this accepts
/// is guaranteed to read back.
pub fn encode(value: &Value) -> Result<String, EncodeError> {
    encode_checked(value).map(|(_, text)| text)
}

/// Encode a value and verify the result, returning both the JSON tree and
/// its rendered text.
pub(crate) fn encode_checked(value: &Value) -> Result<(JsonValue, String), EncodeError> {
    let json = encode_json(value)?;
    let text = serde_json::to_string(&json).map_err(|e| EncodeError::Render(e.to_string()))?;
    decode(&text).map_err(EncodeError::Verification)?;
    Ok((json, text))
}

/// Encode a value to its envelope-form JSON tree, without verification.
pub fn encode_json(value: &Value) -> Result<JsonValue, EncodeError> {
    Encoder::default().encode(value)
}

pub fn decode(text: &str) -> Result<Value, DecodeError> {
    let json: JsonValue =
        serde_json::from_str(text).map_err(|e| DecodeError::Syntax(e.to_string()))?;
    decode_json(&json)
}

pub fn decode_json(json: &JsonValue) -> Result<Value, DecodeError> {
    Ok(match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Float))
            .ok_or_else(|| DecodeError::Syntax(format!("unrepresentable number {n}")))?,
        JsonValue::String(s) => Value::String(s.clone()),
        JsonValue::Array(items) => Value::array(decode_all(items)?),
        JsonValue::Object(fields) => match envelope_kind(fields) {
            Some(kind) => decode_envelope(kind, json)?,
            None => {
                let mut decoded = Vec::with_capacity(fields.len());
                for (key, field) in fields {
                    decoded.push((unescape_key(key).to_string(), decode_json(field)?));
                }
                Value::Object(shared(decoded))
            }
        },
    })
}

fn decode_all(items: &[JsonValue]) -> Result<Vec<Value>, DecodeError> {
    items.iter().map(decode_json).collect()
}

fn envelope_kind(fields: &Map<String, JsonValue>) -> Option<&'static str> {
    let tag = fields.get(TYPE_TAG)?.as_str()?;
    ENVELOPE_KINDS.iter().copied().find(|kind| *kind == tag)
}

fn decode_envelope(kind: &str, json: &JsonValue) -> Result<Value, DecodeError> {
    let malformed = |reason: String| DecodeError::Envelope {
        kind: kind.to_string(),
        reason,
    };
    let envelope: Envelope =
        serde_json::from_value(json.clone()).map_err(|e| malformed(e.to_string()))?;

    Ok(match envelope {
        Envelope::Set { value } => Value::Set(shared(decode_all(&value)?)),
        Envelope::Map { value } => {
            let mut entries = Vec::with_capacity(value.len());
            for (key, entry) in &value {
                entries.push((decode_json(key)?, decode_json(entry)?));
            }
            Value::Map(shared(entries))
        }
        Envelope::Date { value } => {
            let parsed = DateTime::parse_from_rfc3339(&value)
                .map_err(|e| malformed(format!("invalid timestamp `{value}`: {e}")))?;
            Value::Date(parsed.with_timezone(&Utc))
        }
        Envelope::RegExp { source, flags } => Value::RegExp(Pattern::new(source, flags)),
        Envelope::Error {
            name,
            message,
            stack,
        } => Value::Error(ErrorValue {
            name,
            message,
            stack,
        }),
        Envelope::Function { name } => Value::Function(Callable::placeholder(name)),
        Envelope::Promise { .. } => Value::Promise(Deferred::unrestorable()),
    })
}

/// Walk state for a single encode call.
///
/// `ancestors` holds the identity of every container between the root and the
/// node being encoded; it starts empty for each call. `depth` counts the JSON
/// containers enclosing the node, envelopes included.
#[derive(Default)]
struct Encoder {
    ancestors: HashSet<usize>,
    depth: usize,
    custom_hops: usize,
}

impl Encoder {
    fn encode(&mut self, value: &Value) -> Result<JsonValue, EncodeError> {
        match value {
            Value::Null => Ok(JsonValue::Null),
            Value::Bool(b) => Ok(JsonValue::Bool(*b)),
            Value::Int(i) => Ok(JsonValue::from(*i)),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .ok_or(EncodeError::NonFinite(*f)),
            Value::String(s) => Ok(JsonValue::String(s.clone())),
            Value::Array(node) => self.nested(node, 1, |enc, items| {
                enc.encode_all(items).map(JsonValue::Array)
            }),
            Value::Object(node) => self.nested(node, 1, |enc, fields| {
                let mut out = Map::with_capacity(fields.len());
                for (key, field) in fields {
                    out.insert(escape_key(key).into_owned(), enc.encode(field)?);
                }
                Ok(JsonValue::Object(out))
            }),
            // `{"__type": "Set", "value": [..]}`
            Value::Set(node) => self.nested(node, 2, |enc, items| {
                let value = enc.encode_all(items)?;
                envelope(&Envelope::Set { value })
            }),
            // `{"__type": "Map", "value": [[key, value], ..]}`
            Value::Map(node) => self.nested(node, 2, |enc, entries| {
                let mut value = Vec::with_capacity(entries.len());
                for (key, entry) in entries {
                    let pair = enc.descend(1, |enc| Ok((enc.encode(key)?, enc.encode(entry)?)))?;
                    value.push(pair);
                }
                envelope(&Envelope::Map { value })
            }),
            Value::Date(at) => self.flat(&Envelope::Date {
                value: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            }),
            Value::RegExp(pattern) => self.flat(&Envelope::RegExp {
                source: pattern.source().to_string(),
                flags: pattern.flags().to_string(),
            }),
            Value::Error(err) => self.flat(&Envelope::Error {
                name: err.name.clone(),
                message: err.message.clone(),
                stack: err.stack.clone(),
            }),
            Value::Function(callable) => self.flat(&Envelope::Function {
                name: callable.name().to_string(),
            }),
            Value::Promise(_) => self.flat(&Envelope::Promise {
                status: PROMISE_PENDING.to_string(),
            }),
            Value::Custom(custom) => {
                let unsupported = |reason: String| EncodeError::Unsupported {
                    type_name: custom.type_name().to_string(),
                    reason,
                };
                if self.custom_hops >= MAX_CUSTOM_HOPS {
                    return Err(unsupported(format!(
                        "plain form is still a custom value after {MAX_CUSTOM_HOPS} conversions"
                    )));
                }
                let plain = custom.to_value().map_err(unsupported)?;
                self.custom_hops += 1;
                let encoded = self.encode(&plain);
                self.custom_hops -= 1;
                encoded
            }
        }
    }

    fn encode_all(&mut self, items: &[Value]) -> Result<Vec<JsonValue>, EncodeError> {
        items.iter().map(|item| self.encode(item)).collect()
    }

    /// Run `encode` with `levels` more JSON containers around it.
    fn descend<T, F>(&mut self, levels: usize, encode: F) -> Result<T, EncodeError>
    where
        F: FnOnce(&mut Self) -> Result<T, EncodeError>,
    {
        if self.depth + levels > MAX_DEPTH {
            return Err(EncodeError::TooDeep { limit: MAX_DEPTH });
        }
        self.depth += levels;
        let result = encode(self);
        self.depth -= levels;
        result
    }

    /// An envelope with scalar fields only.
    fn flat(&mut self, value: &Envelope) -> Result<JsonValue, EncodeError> {
        self.descend(1, |_| envelope(value))
    }

    fn nested<T, F>(
        &mut self,
        node: &Shared<T>,
        levels: usize,
        encode: F,
    ) -> Result<JsonValue, EncodeError>
    where
        F: FnOnce(&mut Self, &T) -> Result<JsonValue, EncodeError>,
    {
        let id = Arc::as_ptr(node) as *const () as usize;
        if !self.ancestors.insert(id) {
            return Ok(JsonValue::String(CIRCULAR_MARKER.to_string()));
        }
        let result = self.descend(levels, |enc| {
            let inner = node.read_recursive();
            encode(enc, &*inner)
        });
        self.ancestors.remove(&id);
        result
    }
}

fn is_tag_like(key: &str) -> bool {
    key.strip_prefix(TYPE_TAG)
        .is_some_and(|rest| rest.bytes().all(|b| b == b'_'))
}

fn escape_key(key: &str) -> Cow<'_, str> {
    if is_tag_like(key) {
        Cow::Owned(format!("{key}_"))
    } else {
        Cow::Borrowed(key)
    }
}

fn unescape_key(key: &str) -> &str {
    if key.len() > TYPE_TAG.len() && is_tag_like(key) {
        &key[..key.len() - 1]
    } else {
        key
    }
}

fn envelope(envelope: &Envelope) -> Result<JsonValue, EncodeError> {
    serde_json::to_value(envelope).map_err(|e| EncodeError::Render(e.to_string()))
}
