//! Whole-message encode and incremental decode over `BytesMut`.
//!
//! The driver never decodes its own responses; this is for inspecting what
//! went over the wire in tests (`test-util` feature).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::chunked::{decode_chunk, encode_chunk, encode_last_chunk, Chunk};
use crate::error::{FrameError, Result};
use crate::message::{Body, Headers, PipeMessage, StartLine};
use crate::response::Response;
use crate::{DEFAULT_MAX_BODY, MAX_HEADER_BLOCK};

impl PipeMessage {
    /// Serialize into `dst`. Headers are written exactly as stored.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(64 + self.body.len());
        dst.put_slice(self.start.to_string().as_bytes());
        dst.put_slice(b"\r\n");
        self.headers.encode(dst);
        dst.put_slice(b"\r\n");
        match &self.body {
            Body::Empty => {}
            Body::Sized(bytes) => dst.put_slice(bytes),
            Body::Chunked(chunks) => {
                for chunk in chunks.iter().filter(|chunk| !chunk.is_empty()) {
                    encode_chunk(chunk, dst);
                }
                encode_last_chunk(dst);
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode(&mut dst);
        dst.freeze()
    }
}

impl Response {
    pub fn into_message(self) -> PipeMessage {
        let start = self.start_line();
        PipeMessage {
            start,
            headers: self.headers().clone(),
            body: if self.body().is_empty() {
                Body::Empty
            } else {
                Body::Sized(self.body().clone())
            },
        }
    }
}

/// Length of the head (start line, headers, blank line) at the front of `src`.
///
/// Returns `Ok(None)` if the blank line has not arrived yet.
fn head_len(src: &[u8]) -> Result<Option<usize>> {
    let mut offset = 0;
    while let Some(pos) = src[offset..].iter().position(|&b| b == b'\n') {
        let line = &src[offset..offset + pos];
        offset += pos + 1;
        if line.is_empty() || line == b"\r" {
            return Ok(Some(offset));
        }
    }
    if src.len() > MAX_HEADER_BLOCK {
        return Err(FrameError::HeaderBlockTooLarge {
            max: MAX_HEADER_BLOCK,
        });
    }
    Ok(None)
}

/// Decode one message from the front of `src`.
///
/// Returns `Ok(None)` if more data is needed, leaving `src` untouched. On
/// success the message bytes are consumed from `src`.
pub fn decode_message(src: &mut BytesMut) -> Result<Option<PipeMessage>> {
    let Some(head) = head_len(src)? else {
        return Ok(None);
    };

    let text = std::str::from_utf8(&src[..head]).map_err(|_| FrameError::NotUtf8)?;
    let mut lines = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line));
    let start = StartLine::parse(lines.next().unwrap_or_default())?;
    let mut headers = Headers::new();
    for line in lines.take_while(|line| !line.is_empty()) {
        let (name, value) = Headers::parse_line(line)?;
        headers.append(name, value);
    }

    let rest = &src[head..];
    let (body, consumed) = if headers.is_chunked() {
        let mut pending = BytesMut::from(rest);
        let mut chunks = Vec::new();
        let mut total = 0usize;
        loop {
            match decode_chunk(&mut pending)? {
                None => return Ok(None),
                Some(Chunk::Last) => break,
                Some(Chunk::Data(data)) => {
                    total += data.len();
                    if total > DEFAULT_MAX_BODY {
                        return Err(FrameError::BodyTooLarge {
                            size: total,
                            max: DEFAULT_MAX_BODY,
                        });
                    }
                    chunks.push(data);
                }
            }
        }
        (Body::Chunked(chunks), rest.len() - pending.len())
    } else {
        match headers.content_length()? {
            None | Some(0) => (Body::Empty, 0),
            Some(len) if len > DEFAULT_MAX_BODY => {
                return Err(FrameError::BodyTooLarge {
                    size: len,
                    max: DEFAULT_MAX_BODY,
                })
            }
            Some(len) if rest.len() < len => return Ok(None),
            Some(len) => (Body::Sized(Bytes::copy_from_slice(&rest[..len])), len),
        }
    };

    src.advance(head + consumed);
    Ok(Some(PipeMessage {
        start,
        headers,
        body,
    }))
}
