//! Chunked transfer coding.
//!
//! ```text
//! <size in hex>[;extension]\r\n
//! <size bytes>\r\n
//! ...
//! 0\r\n
//! \r\n
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// One decoded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Data(Bytes),
    /// The zero-size chunk that ends the body.
    Last,
}

/// Append one data chunk to `dst`. Empty input writes nothing.
pub fn encode_chunk(data: &[u8], dst: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    let size = format!("{:X}\r\n", data.len());
    dst.reserve(size.len() + data.len() + 2);
    dst.put_slice(size.as_bytes());
    dst.put_slice(data);
    dst.put_slice(b"\r\n");
}

/// Append the terminating zero-size chunk to `dst`.
pub fn encode_last_chunk(dst: &mut BytesMut) {
    dst.put_slice(b"0\r\n\r\n");
}

/// Decode one chunk from the front of `src`.
///
/// Returns `Ok(None)` if more data is needed, leaving `src` untouched.
/// Trailer fields after the last chunk are not supported.
pub fn decode_chunk(src: &mut BytesMut) -> Result<Option<Chunk>> {
    let Some(line_end) = src.iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    let size = parse_size_line(&src[..line_end])?;
    let data_start = line_end + 1;

    if size == 0 {
        if src.len() < data_start + 2 {
            return Ok(None);
        }
        if &src[data_start..data_start + 2] != b"\r\n" {
            return Err(FrameError::MissingChunkTerminator);
        }
        src.advance(data_start + 2);
        return Ok(Some(Chunk::Last));
    }

    let data_end = data_start
        .checked_add(size)
        .ok_or_else(|| FrameError::InvalidChunkSize(format!("{size:X}")))?;
    if src.len() < data_end + 2 {
        return Ok(None);
    }
    if &src[data_end..data_end + 2] != b"\r\n" {
        return Err(FrameError::MissingChunkTerminator);
    }

    src.advance(data_start);
    let data = src.split_to(size).freeze();
    src.advance(2);
    Ok(Some(Chunk::Data(data)))
}

/// Parse a chunk size line, with or without its terminator.
pub(crate) fn parse_size_line(line: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(line).map_err(|_| FrameError::NotUtf8)?;
    let text = text.trim_end_matches(['\r', '\n']);
    let digits = text.split(';').next().unwrap_or_default().trim();
    if digits.is_empty() {
        return Err(FrameError::InvalidChunkSize(text.to_string()));
    }
    usize::from_str_radix(digits, 16).map_err(|_| FrameError::InvalidChunkSize(text.to_string()))
}
