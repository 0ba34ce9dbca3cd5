// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! RESP (REdis Serialization Protocol) value model and codec.
//!
//! Requests arrive as multi-bulk arrays of bulk strings; responses may be
//! any of the five RESP types. The decoder accumulates socket reads into a
//! single buffer and yields one complete frame at a time; the encoder
//! appends frames to an output buffer so that a pipeline burst can be
//! flushed with a single syscall.

/// Incremental frame decoder.
pub mod decode;
/// Buffered frame encoder.
pub mod encode;

use bytes::Bytes;
use thiserror::Error;

/// Upper bound on the element count of a multi-bulk array.
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;
/// Upper bound on a single bulk string payload (512 MB, as redis).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum RespError {
    /// The peer closed the connection in the middle of a frame.
    #[error("connection reset before a full frame was read")]
    UnexpectedEof,

    #[error("invalid frame type byte {0:#04x}")]
    BadType(u8),

    #[error("invalid length prefix: {0}")]
    BadLength(i64),

    #[error("protocol error: {0}")]
    Protocol(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single RESP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resp {
    /// `+<text>\r\n`
    Status(Bytes),
    /// `-<text>\r\n`
    Error(Bytes),
    /// `:<n>\r\n`
    Int(i64),
    /// `$<len>\r\n<payload>\r\n`
    Bulk(Bytes),
    /// `$-1\r\n`
    Null,
    /// `*<n>\r\n<frames...>`
    Array(Vec<Resp>),
    /// `*-1\r\n`
    NullArray,
}

impl Resp {
    /// The `+OK` acknowledgement.
    pub fn ok() -> Self {
        Resp::Status(Bytes::from_static(b"OK"))
    }

    pub fn status(text: impl Into<Bytes>) -> Self {
        Resp::Status(text.into())
    }

    /// An error reply following the `"<CODE> <message>"` convention.
    pub fn error(text: impl Into<Bytes>) -> Self {
        Resp::Error(text.into())
    }

    pub fn bulk(payload: impl Into<Bytes>) -> Self {
        Resp::Bulk(payload.into())
    }

    /// Human-readable type tag, used in coalesce error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Resp::Status(_) => "status",
            Resp::Error(_) => "error",
            Resp::Int(_) => "int",
            Resp::Bulk(_) => "bulk",
            Resp::Null => "null",
            Resp::Array(_) => "array",
            Resp::NullArray => "null-array",
        }
    }
}
