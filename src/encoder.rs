// ABOUTME: Symmetric RESP3 encoder for values, commands, and value sequences
// ABOUTME: Owns a single growable scratch buffer that callers drain after each encode

use crate::value::{Arg, Value};
use bytes::{BufMut, Bytes, BytesMut};

/// Serializes RESP3 values into bytes.
///
/// The encoder owns a single growable `BytesMut` buffer; callers drain it
/// with [`Encoder::take`] once they are ready to hand the bytes to a
/// transport. Encoding writes into the scratch buffer before freezing it.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    pub fn new() -> Self {
        Encoder {
            buf: BytesMut::new(),
        }
    }

    /// Returns the accumulated bytes and resets the internal buffer.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn encode(&mut self, value: &Value) {
        match value {
            Value::SimpleString(s) => self.line(b'+', s.as_bytes()),
            Value::Error { code, message } => self.line(b'-', Self::join_code(code, message).as_bytes()),
            Value::Integer(n) => self.line(b':', n.to_string().as_bytes()),
            Value::Double(d) => self.line(b',', Self::format_double(*d).as_bytes()),
            Value::BigNumber { digits, .. } => self.line(b'(', digits.as_bytes()),
            Value::Boolean(b) => self.line(b'#', if *b { b"t" } else { b"f" }),
            Value::Null => self.line(b'_', b""),
            Value::BlobString(None) => self.null_blob(b'$'),
            Value::BlobString(Some(bytes)) => self.blob(b'$', bytes),
            Value::BlobError { code, message } => {
                let joined = Self::join_code_bytes(code, message);
                self.blob(b'!', &joined);
            }
            Value::VerbatimString { format, data } => {
                let mut body = BytesMut::with_capacity(4 + data.len());
                body.put_slice(format.as_bytes());
                body.put_u8(b':');
                body.put_slice(data);
                self.blob(b'=', &body.freeze());
            }
            Value::Array(None) => self.null_aggregate(b'*'),
            Value::Array(Some(items)) => self.aggregate(b'*', items.len(), items.iter()),
            Value::Set(None) => self.null_aggregate(b'~'),
            Value::Set(Some(items)) => self.aggregate(b'~', items.len(), items.iter()),
            Value::Map(None) => self.null_aggregate(b'%'),
            Value::Map(Some(pairs)) => {
                self.aggregate_header(b'%', pairs.len());
                for (k, v) in pairs {
                    self.encode(k);
                    self.encode(v);
                }
            }
            Value::Push(items) => self.aggregate(b'>', items.len(), items.iter()),
            Value::Attributed(inner, attrs) => {
                self.aggregate_header(b'|', attrs.len());
                for (k, v) in attrs {
                    self.encode(k);
                    self.encode(v);
                }
                self.encode(inner);
            }
        }
    }

    /// Encodes a single value at a time, in order.
    pub fn encode_sequence<'a>(&mut self, values: impl IntoIterator<Item = &'a Value>) {
        for value in values {
            self.encode(value);
        }
    }

    /// Encodes a command as an array-of-blob-strings: the verb followed by
    /// its arguments, each coerced to bytes per the documented rules.
    pub fn encode_command(&mut self, verb: &str, args: &[Arg]) {
        self.aggregate_header(b'*', 1 + args.len());
        self.blob(b'$', verb.as_bytes());
        for arg in args {
            let bytes = Self::coerce_arg(arg);
            self.blob(b'$', &bytes);
        }
    }

    fn coerce_arg(arg: &Arg) -> Bytes {
        match arg {
            Arg::Text(s) => Bytes::copy_from_slice(s.as_bytes()),
            Arg::Integer(n) => Bytes::from(n.to_string().into_bytes()),
            Arg::Bytes(b) => b.clone(),
            // Documented choice (see SPEC_FULL.md §4.3.1): command-argument
            // booleans encode as ASCII "1"/"0", distinct from the wire-level
            // t/f tokens used for decoded reply booleans.
            Arg::Boolean(b) => Bytes::from_static(if *b { b"1" } else { b"0" }),
        }
    }

    fn format_double(d: f64) -> String {
        if d.is_nan() {
            "nan".to_string()
        } else if d == f64::INFINITY {
            "inf".to_string()
        } else if d == f64::NEG_INFINITY {
            "-inf".to_string()
        } else {
            let mut s = format!("{d}");
            if !s.contains('.') && !s.contains('e') && !s.contains('E') {
                s.push_str(".0");
            }
            s
        }
    }

    fn join_code(code: &Option<String>, message: &str) -> String {
        match code {
            Some(code) => format!("{code} {message}"),
            None => message.to_string(),
        }
    }

    fn join_code_bytes(code: &Option<String>, message: &Bytes) -> Bytes {
        match code {
            Some(code) => {
                let mut out = BytesMut::with_capacity(code.len() + 1 + message.len());
                out.put_slice(code.as_bytes());
                out.put_u8(b' ');
                out.put_slice(message);
                out.freeze()
            }
            None => message.clone(),
        }
    }

    fn line(&mut self, prefix: u8, payload: &[u8]) {
        self.buf.put_u8(prefix);
        self.buf.put_slice(payload);
        self.buf.put_slice(b"\r\n");
    }

    fn blob(&mut self, prefix: u8, payload: &[u8]) {
        self.buf.put_u8(prefix);
        self.buf.put_slice(payload.len().to_string().as_bytes());
        self.buf.put_slice(b"\r\n");
        self.buf.put_slice(payload);
        self.buf.put_slice(b"\r\n");
    }

    fn null_blob(&mut self, prefix: u8) {
        self.buf.put_u8(prefix);
        self.buf.put_slice(b"-1\r\n");
    }

    fn null_aggregate(&mut self, prefix: u8) {
        self.buf.put_u8(prefix);
        self.buf.put_slice(b"-1\r\n");
    }

    fn aggregate_header(&mut self, prefix: u8, count: usize) {
        self.buf.put_u8(prefix);
        self.buf.put_slice(count.to_string().as_bytes());
        self.buf.put_slice(b"\r\n");
    }

    fn aggregate<'a>(&mut self, prefix: u8, len: usize, items: impl Iterator<Item = &'a Value>) {
        self.aggregate_header(prefix, len);
        for item in items {
            self.encode(item);
        }
    }
}
