// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::resp::{MAX_ARRAY_LEN, MAX_BULK_LEN, Resp, RespError};

/// Outcome of a parse attempt against the accumulation buffer.
enum Parse {
    /// Not enough buffered bytes for a full frame yet.
    More,
    Frame(Resp),
}

/// Reads RESP frames from the inner stream.
///
/// Bytes are accumulated into `buf`; a frame is only consumed from the
/// buffer once it has been decoded completely, so a short read never leaves
/// the decoder in a torn state.
#[derive(Debug)]
pub struct FrameReader<R> {
    io: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(io: R) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Decodes one frame. Returns `Ok(None)` on a clean EOF at a frame
    /// boundary; EOF in the middle of a frame is an error.
    pub async fn read_frame(&mut self) -> Result<Option<Resp>, RespError> {
        loop {
            let mut pos = 0usize;
            match parse_frame(&self.buf, &mut pos, 0)? {
                Parse::Frame(frame) => {
                    self.buf.advance(pos);
                    return Ok(Some(frame));
                },
                Parse::More => {},
            }

            if self.io.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(RespError::UnexpectedEof);
            }
        }
    }

    /// Decodes one client request: a multi-bulk array of bulk strings,
    /// returned as its argument vector.
    pub async fn read_multi_bulk(&mut self) -> Result<Option<Vec<Bytes>>, RespError> {
        let Some(frame) = self.read_frame().await? else {
            return Ok(None);
        };
        let Resp::Array(elems) = frame else {
            return Err(RespError::Protocol("request must be a multi-bulk array"));
        };
        if elems.is_empty() {
            return Err(RespError::Protocol("request multi-bulk is empty"));
        }
        let mut multi = Vec::with_capacity(elems.len());
        for elem in elems {
            match elem {
                Resp::Bulk(payload) => multi.push(payload),
                _ => {
                    return Err(RespError::Protocol(
                        "request arguments must be bulk strings",
                    ));
                },
            }
        }
        Ok(Some(multi))
    }
}

/// Parses one frame starting at `*pos`; advances `*pos` past the frame on
/// success. `depth` guards against pathological array nesting.
fn parse_frame(buf: &[u8], pos: &mut usize, depth: usize) -> Result<Parse, RespError> {
    if depth > 32 {
        return Err(RespError::Protocol("array nesting too deep"));
    }
    let Some(&kind) = buf.get(*pos) else {
        return Ok(Parse::More);
    };
    let line_start = *pos + 1;
    let Some(line_end) = find_crlf(buf, line_start) else {
        return Ok(Parse::More);
    };
    let line = &buf[line_start..line_end];
    let after_line = line_end + 2;

    match kind {
        b'+' => {
            *pos = after_line;
            Ok(Parse::Frame(Resp::Status(Bytes::copy_from_slice(line))))
        },
        b'-' => {
            *pos = after_line;
            Ok(Parse::Frame(Resp::Error(Bytes::copy_from_slice(line))))
        },
        b':' => {
            let v = parse_int(line)?;
            *pos = after_line;
            Ok(Parse::Frame(Resp::Int(v)))
        },
        b'$' => {
            let n = parse_int(line)?;
            if n == -1 {
                *pos = after_line;
                return Ok(Parse::Frame(Resp::Null));
            }
            if n < 0 || n as usize > MAX_BULK_LEN {
                return Err(RespError::BadLength(n));
            }
            let len = n as usize;
            if buf.len() < after_line + len + 2 {
                return Ok(Parse::More);
            }
            if &buf[after_line + len..after_line + len + 2] != b"\r\n" {
                return Err(RespError::Protocol("bulk string missing trailing CRLF"));
            }
            let payload = Bytes::copy_from_slice(&buf[after_line..after_line + len]);
            *pos = after_line + len + 2;
            Ok(Parse::Frame(Resp::Bulk(payload)))
        },
        b'*' => {
            let n = parse_int(line)?;
            if n == -1 {
                *pos = after_line;
                return Ok(Parse::Frame(Resp::NullArray));
            }
            if n < 0 || n as usize > MAX_ARRAY_LEN {
                return Err(RespError::BadLength(n));
            }
            let mut cursor = after_line;
            let mut elems = Vec::with_capacity((n as usize).min(1024));
            for _ in 0..n {
                match parse_frame(buf, &mut cursor, depth + 1)? {
                    Parse::Frame(f) => elems.push(f),
                    Parse::More => return Ok(Parse::More),
                }
            }
            *pos = cursor;
            Ok(Parse::Frame(Resp::Array(elems)))
        },
        other => Err(RespError::BadType(other)),
    }
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| from + i)
}

fn parse_int(line: &[u8]) -> Result<i64, RespError> {
    let s = std::str::from_utf8(line)
        .map_err(|_| RespError::Protocol("length prefix is not valid UTF-8"))?;
    s.parse::<i64>()
        .map_err(|_| RespError::Protocol("length prefix is not an integer"))
}
