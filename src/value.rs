// ABOUTME: The RESP3 value data model decoded from and encoded to the wire
// ABOUTME: Every value may nest an Attributed wrapper instead of a decoder-level sentinel null

use bytes::Bytes;

/// An ordered key/value sidecar attached to the value that immediately follows
/// it on the wire (the `|` attributes prefix).
pub type Attributes = Vec<(Value, Value)>;

/// A single RESP3 value.
///
/// `Attributed` is how attributes decoration is represented structurally,
/// at any nesting depth, rather than via a transient sentinel null the way
/// the protocol's reference implementation did it; see the design notes on
/// why a sentinel is the wrong shape. A value carrying attributes is just
/// another `Value`, so it composes naturally inside arrays/maps/sets.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    SimpleString(String),
    Error {
        code: Option<String>,
        message: String,
    },
    Integer(i64),
    Double(f64),
    /// Arbitrary-precision integer. `digits` is the exact literal from the
    /// wire; `parsed` is a best-effort `i128` when the digit string fits.
    BigNumber {
        digits: String,
        parsed: Option<i128>,
    },
    Boolean(bool),
    Null,
    BlobString(Option<Bytes>),
    BlobError {
        code: Option<String>,
        message: Bytes,
    },
    VerbatimString {
        format: String,
        data: Bytes,
    },
    Array(Option<Vec<Value>>),
    Map(Option<Vec<(Value, Value)>>),
    Set(Option<Vec<Value>>),
    Push(Vec<Value>),
    Attributed(Box<Value>, Attributes),
}

impl Value {
    /// Splits a RESP error/blob-error body into an optional uppercase code
    /// token and the remaining message, on the first space.
    pub(crate) fn split_code(body: &str) -> (Option<String>, String) {
        match body.split_once(' ') {
            Some((head, rest)) if !head.is_empty() && head.chars().all(|c| c.is_ascii_uppercase()) => {
                (Some(head.to_string()), rest.to_string())
            }
            _ => (None, body.to_string()),
        }
    }

    /// Splits a blob-error body (bytes) the same way, tolerating non-UTF8
    /// bytes in the message portion by only inspecting the ASCII-only code
    /// prefix.
    pub(crate) fn split_code_bytes(body: &Bytes) -> (Option<String>, Bytes) {
        if let Some(space) = body.iter().position(|&b| b == b' ') {
            let head = &body[..space];
            if !head.is_empty() && head.iter().all(|&b| b.is_ascii_uppercase()) {
                let code = String::from_utf8_lossy(head).into_owned();
                return (Some(code), body.slice(space + 1..));
            }
        }
        (None, body.clone())
    }

    /// True if this value (ignoring an `Attributed` wrapper) is a push frame.
    pub fn is_push(&self) -> bool {
        matches!(self.unwrap_attributed(), Value::Push(_))
    }

    /// Strips one layer of `Attributed`, if present, returning the inner
    /// value and the attributes that decorated it.
    pub fn into_parts(self) -> (Value, Option<Attributes>) {
        match self {
            Value::Attributed(inner, attrs) => (*inner, Some(attrs)),
            other => (other, None),
        }
    }

    fn unwrap_attributed(&self) -> &Value {
        match self {
            Value::Attributed(inner, _) => inner,
            other => other,
        }
    }
}

/// A fully decoded top-level unit: the value plus any attributes that
/// decorated it. This is what the decoder's reply and push sinks receive.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub value: Value,
    pub attributes: Option<Attributes>,
}

impl Reply {
    pub(crate) fn from_value(value: Value) -> Self {
        let (value, attributes) = value.into_parts();
        Reply { value, attributes }
    }
}

/// A scalar argument accepted by the public send surface. Commands are
/// always encoded as arrays of blob strings, so every variant ultimately
/// coerces to bytes.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Text(String),
    Integer(i64),
    Bytes(Bytes),
    Boolean(bool),
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Text(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Text(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Integer(value)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Boolean(value)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Self {
        Arg::Bytes(Bytes::from(value))
    }
}
