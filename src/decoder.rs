// ABOUTME: Incremental, resumable RESP3 decoder driven by repeated `feed` calls
// ABOUTME: Stack-based aggregate tracking means chunk boundaries never force a re-parse

use crate::error::{DecodeError, DecodeErrorKind};
use crate::value::{Attributes, Reply, Value};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregateKind {
    Array,
    Map,
    Set,
    Push,
    Attributes,
}

/// One level of the Decoder Frame Stack: an aggregate whose header has been
/// read but whose children are still arriving.
#[derive(Debug)]
struct AggregateFrame {
    kind: AggregateKind,
    /// Number of child *values* still required (pairs counted as 2 for maps
    /// and attributes, per the wire encoding).
    remaining: usize,
    items: Vec<Value>,
    /// Attributes that were pending immediately before this aggregate's own
    /// header; they decorate the finished aggregate as a whole. Not used
    /// for `Attributes`-kind frames, which never carry their own attributes.
    attrs: Option<Attributes>,
}

enum ParsedUnit {
    Scalar(Value),
    AggregateHeader { kind: AggregateKind, count: i64 },
}

/// Incremental RESP3 decoder.
///
/// Bytes are appended with [`Decoder::feed`]; complete values are drained
/// with [`Decoder::next_reply`] and complete push frames with
/// [`Decoder::next_push`]. The decoder never re-parses bytes it has already
/// committed: a partial value leaves the accumulation buffer untouched until
/// enough data has arrived to parse it in full.
pub struct Decoder {
    buf: BytesMut,
    stack: Vec<AggregateFrame>,
    pending_attributes: Option<Attributes>,
    replies: VecDeque<Reply>,
    pushes: VecDeque<Reply>,
    consumed_total: u64,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Decoder {
            buf: BytesMut::new(),
            stack: Vec::new(),
            pending_attributes: None,
            replies: VecDeque::new(),
            pushes: VecDeque::new(),
            consumed_total: 0,
        }
    }

    /// Appends `chunk` and parses as many complete units as the buffered
    /// data allows. Returns `Err` on the first fatal decode error, having
    /// already reset the decoder's buffer and frame stack per the fatal
    /// reset policy; the next `feed` starts fresh.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), DecodeError> {
        self.buf.extend_from_slice(chunk);

        loop {
            match Self::try_parse_unit(&self.buf) {
                Ok(Some((unit, consumed))) => {
                    self.buf.advance(consumed);
                    self.consumed_total += consumed as u64;
                    self.apply_unit(unit)?;
                }
                Ok(None) => break,
                Err(kind) => {
                    let err = DecodeError::new(self.consumed_total, kind);
                    self.reset();
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    /// Pops the next fully-decoded non-push reply, if any.
    pub fn next_reply(&mut self) -> Option<Reply> {
        self.replies.pop_front()
    }

    /// Pops the next fully-decoded push frame, if any.
    pub fn next_push(&mut self) -> Option<Reply> {
        self.pushes.pop_front()
    }

    /// Clears the accumulation buffer, frame stack, and pending attributes.
    /// Called automatically on a fatal decode error; exposed so a session
    /// can force a reset after deciding a connection is unrecoverable.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.stack.clear();
        self.pending_attributes = None;
    }

    fn apply_unit(&mut self, unit: ParsedUnit) -> Result<(), DecodeError> {
        match unit {
            ParsedUnit::Scalar(value) => {
                self.complete_value(value);
                Ok(())
            }
            ParsedUnit::AggregateHeader { kind, count } => {
                if count < -1 {
                    return Err(DecodeError::new(
                        self.consumed_total,
                        DecodeErrorKind::InvalidLength,
                    ));
                }
                if count <= 0 {
                    if kind == AggregateKind::Attributes {
                        // A null or empty attributes header contributes no
                        // value of its own; it just arms (or leaves empty)
                        // the pending-attributes cell.
                        self.pending_attributes = Some(Vec::new());
                    } else {
                        let value = Self::empty_or_null_aggregate(kind, count == -1);
                        self.complete_value(value);
                    }
                } else {
                    let remaining = match kind {
                        AggregateKind::Map | AggregateKind::Attributes => count as usize * 2,
                        _ => count as usize,
                    };
                    let attrs = if kind == AggregateKind::Attributes {
                        None
                    } else {
                        self.pending_attributes.take()
                    };
                    self.stack.push(AggregateFrame {
                        kind,
                        remaining,
                        items: Vec::with_capacity(remaining),
                        attrs,
                    });
                }
                Ok(())
            }
        }
    }

    fn empty_or_null_aggregate(kind: AggregateKind, is_null: bool) -> Value {
        match kind {
            AggregateKind::Array => Value::Array(if is_null { None } else { Some(Vec::new()) }),
            AggregateKind::Map => Value::Map(if is_null { None } else { Some(Vec::new()) }),
            AggregateKind::Set => Value::Set(if is_null { None } else { Some(Vec::new()) }),
            // A push is never null: a -1-length push decodes as empty.
            AggregateKind::Push => Value::Push(Vec::new()),
            AggregateKind::Attributes => unreachable!("handled before calling this"),
        }
    }

    /// A value has just finished parsing (scalar, or an immediately-resolved
    /// null/empty aggregate). Attaches any pending attributes and delivers
    /// it either into the parent aggregate frame or out to the top level.
    fn complete_value(&mut self, value: Value) {
        let value = match self.pending_attributes.take() {
            Some(attrs) => Value::Attributed(Box::new(value), attrs),
            None => value,
        };
        self.deliver(value);
    }

    fn deliver(&mut self, value: Value) {
        if let Some(frame) = self.stack.last_mut() {
            frame.items.push(value);
            frame.remaining -= 1;
            if frame.remaining == 0 {
                let frame = self.stack.pop().expect("just checked non-empty");
                self.finalize_frame(frame);
            }
        } else {
            let reply = Reply::from_value(value);
            if reply.value.is_push() {
                self.pushes.push_back(reply);
            } else {
                self.replies.push_back(reply);
            }
        }
    }

    fn finalize_frame(&mut self, frame: AggregateFrame) {
        match frame.kind {
            AggregateKind::Attributes => {
                self.pending_attributes = Some(Self::pair_up(frame.items));
            }
            AggregateKind::Array => {
                let value = Value::Array(Some(frame.items));
                self.deliver_with_attrs(value, frame.attrs);
            }
            AggregateKind::Set => {
                let value = Value::Set(Some(frame.items));
                self.deliver_with_attrs(value, frame.attrs);
            }
            AggregateKind::Push => {
                let value = Value::Push(frame.items);
                self.deliver_with_attrs(value, frame.attrs);
            }
            AggregateKind::Map => {
                let value = Value::Map(Some(Self::pair_up(frame.items)));
                self.deliver_with_attrs(value, frame.attrs);
            }
        }
    }

    fn deliver_with_attrs(&mut self, value: Value, attrs: Option<Attributes>) {
        let value = match attrs {
            Some(attrs) => Value::Attributed(Box::new(value), attrs),
            None => value,
        };
        self.deliver(value);
    }

    fn pair_up(items: Vec<Value>) -> Vec<(Value, Value)> {
        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut it = items.into_iter();
        while let (Some(k), Some(v)) = (it.next(), it.next()) {
            pairs.push((k, v));
        }
        pairs
    }

    /// Attempts to parse exactly one unit (scalar or aggregate header) from
    /// the front of `data`. Returns `Ok(None)` if more bytes are needed;
    /// crucially, without having consumed anything, so the caller's buffer
    /// is untouched and the next attempt starts from the same offset.
    fn try_parse_unit(data: &[u8]) -> Result<Option<(ParsedUnit, usize)>, DecodeErrorKind> {
        let Some(&prefix) = data.first() else {
            return Ok(None);
        };
        let rest = &data[1..];

        match prefix {
            b'+' => Self::parse_line(rest).map(|opt| {
                opt.map(|(line, len)| {
                    (
                        ParsedUnit::Scalar(Value::SimpleString(line.to_string())),
                        1 + len,
                    )
                })
            }),
            b'-' => Self::parse_line(rest).map(|opt| {
                opt.map(|(line, len)| {
                    let (code, message) = Value::split_code(&line);
                    (ParsedUnit::Scalar(Value::Error { code, message }), 1 + len)
                })
            }),
            b':' => Self::parse_line(rest).and_then(|opt| match opt {
                None => Ok(None),
                Some((line, len)) => {
                    let n: i64 = line
                        .trim()
                        .parse()
                        .map_err(|_| DecodeErrorKind::InvalidNumeric)?;
                    Ok(Some((ParsedUnit::Scalar(Value::Integer(n)), 1 + len)))
                }
            }),
            b',' => Self::parse_line(rest).and_then(|opt| match opt {
                None => Ok(None),
                Some((line, len)) => {
                    let d = Self::parse_double(&line)?;
                    Ok(Some((ParsedUnit::Scalar(Value::Double(d)), 1 + len)))
                }
            }),
            b'#' => Self::parse_line(rest).and_then(|opt| match opt {
                None => Ok(None),
                Some((line, len)) => {
                    let b = match line.as_str() {
                        "t" => true,
                        "f" => false,
                        _ => return Err(DecodeErrorKind::InvalidBoolean),
                    };
                    Ok(Some((ParsedUnit::Scalar(Value::Boolean(b)), 1 + len)))
                }
            }),
            b'_' => Self::parse_line(rest).and_then(|opt| match opt {
                None => Ok(None),
                Some((line, len)) => {
                    if !line.is_empty() {
                        return Err(DecodeErrorKind::InvalidNull);
                    }
                    Ok(Some((ParsedUnit::Scalar(Value::Null), 1 + len)))
                }
            }),
            b'(' => Self::parse_line(rest).map(|opt| {
                opt.map(|(line, len)| {
                    let parsed = line.trim().parse::<i128>().ok();
                    (
                        ParsedUnit::Scalar(Value::BigNumber {
                            digits: line,
                            parsed,
                        }),
                        1 + len,
                    )
                })
            }),
            b'$' => Self::parse_blob(rest, 1, |body| Value::BlobString(body)),
            b'!' => Self::parse_blob(rest, 1, |body| match body {
                // A -1-length blob error is contradictory per the wire rules
                // but is treated leniently as an empty-message blob error
                // rather than a decode error.
                None => Value::BlobError {
                    code: None,
                    message: Bytes::new(),
                },
                Some(bytes) => {
                    let (code, message) = Value::split_code_bytes(&bytes);
                    Value::BlobError { code, message }
                }
            }),
            b'=' => Self::parse_blob(rest, 1, |body| {
                let bytes = body.unwrap_or_default();
                if bytes.len() < 4 {
                    // Too short to hold a 3-byte format tag plus colon;
                    // fall back to the lenient default rather than fail.
                    return Value::VerbatimString {
                        format: "txt".to_string(),
                        data: bytes,
                    };
                }
                if bytes[3] == b':' {
                    let format = String::from_utf8_lossy(&bytes[..3]).into_owned();
                    Value::VerbatimString {
                        format,
                        data: bytes.slice(4..),
                    }
                } else {
                    Value::VerbatimString {
                        format: "txt".to_string(),
                        data: bytes,
                    }
                }
            }),
            b'*' => Self::parse_aggregate_header(rest, AggregateKind::Array),
            b'%' => Self::parse_aggregate_header(rest, AggregateKind::Map),
            b'~' => Self::parse_aggregate_header(rest, AggregateKind::Set),
            b'>' => Self::parse_aggregate_header(rest, AggregateKind::Push),
            b'|' => Self::parse_aggregate_header(rest, AggregateKind::Attributes),
            other => Err(DecodeErrorKind::UnexpectedPrefix(other)),
        }
    }

    fn parse_aggregate_header(
        rest: &[u8],
        kind: AggregateKind,
    ) -> Result<Option<(ParsedUnit, usize)>, DecodeErrorKind> {
        match Self::parse_line(rest)? {
            None => Ok(None),
            Some((line, len)) => {
                let count: i64 = line
                    .trim()
                    .parse()
                    .map_err(|_| DecodeErrorKind::InvalidLength)?;
                Ok(Some((ParsedUnit::AggregateHeader { kind, count }, 1 + len)))
            }
        }
    }

    fn parse_double(line: &str) -> Result<f64, DecodeErrorKind> {
        match line.to_ascii_lowercase().as_str() {
            "inf" | "+inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            "nan" => Ok(f64::NAN),
            other => other.parse().map_err(|_| DecodeErrorKind::InvalidNumeric),
        }
    }

    /// Reads a length-prefixed blob: a decimal length line, then exactly
    /// that many payload bytes, then a literal CRLF terminator. `-1` decodes
    /// as `build(None)`; a non-negative length decodes as `build(Some(...))`.
    fn parse_blob(
        rest: &[u8],
        prefix_len: usize,
        build: impl FnOnce(Option<Bytes>) -> Value,
    ) -> Result<Option<(ParsedUnit, usize)>, DecodeErrorKind> {
        let Some((line, line_len)) = Self::parse_line(rest)? else {
            return Ok(None);
        };
        let n: i64 = line
            .trim()
            .parse()
            .map_err(|_| DecodeErrorKind::InvalidLength)?;
        if n < -1 {
            return Err(DecodeErrorKind::InvalidLength);
        }
        if n == -1 {
            return Ok(Some((
                ParsedUnit::Scalar(build(None)),
                prefix_len + line_len,
            )));
        }
        let n = n as usize;
        let body_start = line_len;
        let needed = n + 2;
        if rest.len() - body_start < needed {
            return Ok(None);
        }
        let body = &rest[body_start..body_start + n];
        let term = &rest[body_start + n..body_start + n + 2];
        if term != CRLF {
            return Err(DecodeErrorKind::BlobNotTerminated);
        }
        let bytes = Bytes::copy_from_slice(body);
        Ok(Some((
            ParsedUnit::Scalar(build(Some(bytes))),
            prefix_len + body_start + needed,
        )))
    }

    /// Finds the next CRLF-terminated line in `data`, returning the line
    /// (without the terminator) as a `String` and the number of bytes
    /// consumed including the terminator. `Ok(None)` means the terminator
    /// has not arrived yet; `data` is left untouched by the caller.
    fn parse_line(data: &[u8]) -> Result<Option<(String, usize)>, DecodeErrorKind> {
        match data.windows(2).position(|w| w == CRLF) {
            None => Ok(None),
            Some(pos) => {
                let line = std::str::from_utf8(&data[..pos])
                    .map_err(|_| DecodeErrorKind::InvalidUtf8)?
                    .to_string();
                Ok(Some((line, pos + 2)))
            }
        }
    }
}
