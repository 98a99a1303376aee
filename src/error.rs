// ABOUTME: Crate-wide error taxonomy spanning transport, protocol, semantic, session, and config failures
// ABOUTME: One flat thiserror enum spanning every layer rather than one error type per layer

use std::io;
use thiserror::Error;

/// A single decode failure raised by the [`crate::decoder::Decoder`].
///
/// Carries the byte offset (relative to the start of the decoder's lifetime,
/// not the current chunk) at which the offending prefix or field was read.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("resp3 decode error at offset {offset}: {kind}")]
pub struct DecodeError {
    pub offset: u64,
    pub kind: DecodeErrorKind,
}

impl DecodeError {
    pub fn new(offset: u64, kind: DecodeErrorKind) -> Self {
        DecodeError { offset, kind }
    }
}

/// The specific reason a [`DecodeError`] was raised.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeErrorKind {
    #[error("unexpected prefix byte {0:#04x}")]
    UnexpectedPrefix(u8),

    #[error("blob payload not terminated by CRLF")]
    BlobNotTerminated,

    #[error("invalid aggregate or blob length")]
    InvalidLength,

    #[error("invalid numeric payload")]
    InvalidNumeric,

    #[error("invalid boolean payload, expected 't' or 'f'")]
    InvalidBoolean,

    #[error("null payload must be empty")]
    InvalidNull,

    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// Comprehensive error type for every operation the core exposes.
///
/// Grouped by the five categories the design lays out: transport, protocol,
/// semantic (server-reported errors), session (correlation/lifecycle), and
/// config. Callers match on this one flat type rather than one per layer.
#[derive(Debug, Error)]
pub enum RespError {
    // --- transport ---
    #[error("connection refused")]
    ConnectionRefused,

    #[error("connection reset by peer")]
    ConnectionReset,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection timed out")]
    ConnectionTimeout,

    #[error("write failed: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("invalid transport state for this operation: {0}")]
    InvalidTransportState(String),

    #[error("io error: {0}")]
    UnknownIo(#[from] io::Error),

    // --- protocol ---
    #[error("protocol error: {0}")]
    Protocol(#[from] DecodeError),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    // --- semantic ---
    #[error("server error{}: {message}", code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    ServerError {
        code: Option<String>,
        message: String,
    },

    #[error(
        "server blob error{}: {} byte message",
        code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default(),
        message.len()
    )]
    ServerBlobError {
        code: Option<String>,
        message: bytes::Bytes,
    },

    // --- session ---
    #[error("command submitted without an active connection")]
    ConnectionRequired,

    #[error("command timed out")]
    CommandTimeout,

    #[error("command was cancelled")]
    CommandCancelled,

    #[error("unsolicited reply: no pending request to correlate it with")]
    UnsolicitedReply,

    // --- config ---
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

/// Crate-wide result alias.
pub type RespResult<T> = Result<T, RespError>;
