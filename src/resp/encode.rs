// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::resp::Resp;

/// Writes RESP frames to the inner stream through an output buffer.
///
/// `encode` never touches the socket; the session writer calls `flush` only
/// when its task channel runs dry, amortizing syscalls across a pipeline
/// burst.
#[derive(Debug)]
pub struct FrameWriter<W> {
    io: W,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(io: W) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Appends one frame to the output buffer.
    pub fn encode(&mut self, resp: &Resp) {
        encode_into(&mut self.buf, resp);
    }

    /// Writes out and flushes everything buffered so far.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        if !self.buf.is_empty() {
            self.io.write_all(&self.buf).await?;
            self.buf.clear();
        }
        self.io.flush().await
    }
}

/// Serializes `resp` onto the end of `buf`.
pub fn encode_into(buf: &mut BytesMut, resp: &Resp) {
    match resp {
        Resp::Status(text) => {
            buf.put_u8(b'+');
            buf.extend_from_slice(text);
            buf.extend_from_slice(b"\r\n");
        },
        Resp::Error(text) => {
            buf.put_u8(b'-');
            buf.extend_from_slice(text);
            buf.extend_from_slice(b"\r\n");
        },
        Resp::Int(v) => {
            buf.put_u8(b':');
            put_i64(buf, *v);
            buf.extend_from_slice(b"\r\n");
        },
        Resp::Bulk(payload) => {
            buf.put_u8(b'$');
            put_i64(buf, payload.len() as i64);
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(payload);
            buf.extend_from_slice(b"\r\n");
        },
        Resp::Null => buf.extend_from_slice(b"$-1\r\n"),
        Resp::Array(elems) => {
            buf.put_u8(b'*');
            put_i64(buf, elems.len() as i64);
            buf.extend_from_slice(b"\r\n");
            for elem in elems {
                encode_into(buf, elem);
            }
        },
        Resp::NullArray => buf.extend_from_slice(b"*-1\r\n"),
    }
}

fn put_i64(buf: &mut BytesMut, v: i64) {
    let mut tmp = [0u8; 20];
    let mut n = v.unsigned_abs();
    let mut at = tmp.len();
    loop {
        at -= 1;
        tmp[at] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    if v < 0 {
        buf.put_u8(b'-');
    }
    buf.extend_from_slice(&tmp[at..]);
}
