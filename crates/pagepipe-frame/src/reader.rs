//! Reading framed input from a [`ReadChannel`] under a deadline.
//!
//! Each function takes one deadline that bounds the whole unit it reads: a
//! header block, an asset request, a body.

use bytes::{Bytes, BytesMut};
use pagepipe_transport::{Deadline, ReadChannel};
use tracing::{debug, trace};

use crate::chunked::parse_size_line;
use crate::error::{FrameError, Result};
use crate::message::{line_text, Headers};
use crate::request::{AssetRequest, Method};
use crate::{DEFAULT_MAX_BODY, MAX_HEADER_BLOCK, MAX_PUT_BODY};

/// Read header lines up to and including the blank line that ends the block.
///
/// Returns the lines without terminators. The blank line is `\r\n` or `\n`.
pub async fn read_header_lines<R: ReadChannel>(
    reader: &mut R,
    deadline: Deadline,
) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut total = 0usize;
    loop {
        let raw = reader.read_line(deadline).await?;
        total += raw.len();
        if total > MAX_HEADER_BLOCK {
            return Err(FrameError::HeaderBlockTooLarge {
                max: MAX_HEADER_BLOCK,
            });
        }
        let line = line_text(&raw)?;
        if line.is_empty() {
            return Ok(lines);
        }
        debug!(line, "header");
        lines.push(line.to_string());
    }
}

/// Read and discard one header block, returning how many lines it held.
pub async fn consume_header_block<R: ReadChannel>(
    reader: &mut R,
    deadline: Deadline,
) -> Result<usize> {
    Ok(read_header_lines(reader, deadline).await?.len())
}

/// Read one request: request line, header block, and any declared body.
///
/// Header lines that are not `name: value` are logged and skipped; only the
/// request line is validated. A `PUT` body is the head of the rendered
/// artifact and may be up to [`MAX_PUT_BODY`] bytes.
pub async fn read_asset_request<R: ReadChannel>(
    reader: &mut R,
    deadline: Deadline,
) -> Result<AssetRequest> {
    let raw = reader.read_line(deadline).await?;
    let line = line_text(&raw)?;
    debug!(line, "request line");
    let (method, target, version) = AssetRequest::parse_line(line)?;

    let mut headers = Headers::new();
    for line in read_header_lines(reader, deadline).await? {
        match Headers::parse_line(&line) {
            Ok((name, value)) => headers.append(name, value),
            Err(_) => debug!(line, "skipping unparsable header line"),
        }
    }

    let max = match method {
        Method::Get => DEFAULT_MAX_BODY,
        Method::Put => MAX_PUT_BODY,
    };
    let body = read_body(reader, &headers, deadline, max).await?;
    if !body.is_empty() {
        trace!(bytes = body.len(), %method, "request body");
    }

    Ok(match method {
        Method::Get => AssetRequest::Get {
            path: target,
            version,
            headers,
        },
        Method::Put => AssetRequest::Put {
            version,
            headers,
            body,
        },
    })
}

/// Read the body `headers` declare: chunked, `Content-Length`, or none.
pub async fn read_body<R: ReadChannel>(
    reader: &mut R,
    headers: &Headers,
    deadline: Deadline,
    max: usize,
) -> Result<Bytes> {
    if headers.is_chunked() {
        return read_chunked_body(reader, deadline, max).await;
    }
    match headers.content_length()? {
        None | Some(0) => Ok(Bytes::new()),
        Some(len) if len > max => Err(FrameError::BodyTooLarge { size: len, max }),
        Some(len) => Ok(reader.read_exact(len, deadline).await?),
    }
}

async fn read_chunked_body<R: ReadChannel>(
    reader: &mut R,
    deadline: Deadline,
    max: usize,
) -> Result<Bytes> {
    let mut body = BytesMut::new();
    loop {
        let size_line = reader.read_line(deadline).await?;
        let size = parse_size_line(&size_line)?;
        if size == 0 {
            // Trailer fields, if any, end with a blank line like any header block.
            read_header_lines(reader, deadline).await?;
            return Ok(body.freeze());
        }
        if body.len() + size > max {
            return Err(FrameError::BodyTooLarge {
                size: body.len() + size,
                max,
            });
        }
        let data = reader.read_exact(size + 2, deadline).await?;
        if !data.ends_with(b"\r\n") {
            return Err(FrameError::MissingChunkTerminator);
        }
        body.extend_from_slice(&data[..size]);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    use pagepipe_transport::{PollReader, TransportError};

    use super::*;

    fn reader_with(bytes: &[u8]) -> PollReader<UnixStream> {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        tx.write_all(bytes).unwrap();
        drop(tx);
        PollReader::new(rx).unwrap()
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(2))
    }

    #[test]
    fn consumes_handshake_block() {
        let mut reader =
            reader_with(b"X-Renderer: pm\r\nAccept: text/html\r\n\r\nGET /a HTTP/1.1\r\n\r\n");
        let count = pollster::block_on(consume_header_block(&mut reader, deadline())).unwrap();
        assert_eq!(count, 2);

        let request = pollster::block_on(read_asset_request(&mut reader, deadline())).unwrap();
        assert_eq!(request.path(), Some("/a"));
    }

    #[test]
    fn accepts_bare_newline_as_blank_line() {
        let mut reader = reader_with(b"Hello\n\nPUT - HTTP/1.1\n\n");
        assert_eq!(
            pollster::block_on(consume_header_block(&mut reader, deadline())).unwrap(),
            1
        );
        let request = pollster::block_on(read_asset_request(&mut reader, deadline())).unwrap();
        assert!(request.is_final());
    }

    #[test]
    fn handshake_cut_short_is_end_of_stream() {
        let mut reader = reader_with(b"X-Renderer: pm\r\n");
        let err = pollster::block_on(consume_header_block(&mut reader, deadline())).unwrap_err();
        assert!(matches!(err, FrameError::Transport(TransportError::EndOfStream)));
    }

    #[test]
    fn request_headers_are_kept_and_junk_skipped() {
        let mut reader =
            reader_with(b"GET /logo.png HTTP/1.1\r\nAccept: image/*\r\njunk\r\n\r\n");
        let request = pollster::block_on(read_asset_request(&mut reader, deadline())).unwrap();
        match request {
            AssetRequest::Get {
                path,
                version,
                headers,
            } => {
                assert_eq!(path, "/logo.png");
                assert_eq!(version, "HTTP/1.1");
                assert_eq!(headers.get("accept"), Some("image/*"));
                assert_eq!(headers.len(), 1);
            }
            other => panic!("expected GET, got {other:?}"),
        }
    }

    #[test]
    fn put_body_is_consumed() {
        let mut reader = reader_with(
            b"PUT /out HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n\
              GET /b HTTP/1.1\r\nContent-Length: 2\r\n\r\nxy",
        );
        let put = pollster::block_on(read_asset_request(&mut reader, deadline())).unwrap();
        assert!(matches!(put, AssetRequest::Put { ref body, .. } if body.as_ref() == b"abc"));

        let get = pollster::block_on(read_asset_request(&mut reader, deadline())).unwrap();
        assert_eq!(get.path(), Some("/b"));
    }

    #[test]
    fn put_body_with_content_length_is_kept() {
        let mut reader =
            reader_with(b"PUT - HTTP/1.1\r\nContent-Length: 8\r\n\r\n%PDF-1.7trailing");
        let put = pollster::block_on(read_asset_request(&mut reader, deadline())).unwrap();
        match put {
            AssetRequest::Put { body, headers, .. } => {
                assert_eq!(body.as_ref(), b"%PDF-1.7");
                assert_eq!(headers.content_length().unwrap(), Some(8));
            }
            other => panic!("expected PUT, got {other:?}"),
        }
        let rest = pollster::block_on(reader.read_exact(8, deadline())).unwrap();
        assert_eq!(rest.as_ref(), b"trailing");
    }

    #[test]
    fn malformed_request_line_is_protocol_error() {
        let mut reader = reader_with(b"GET\r\n\r\n");
        let err = pollster::block_on(read_asset_request(&mut reader, deadline())).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn silent_peer_times_out() {
        let (_tx, rx) = UnixStream::pair().unwrap();
        let mut reader = PollReader::new(rx).unwrap();
        let err = pollster::block_on(read_asset_request(
            &mut reader,
            Deadline::after(Duration::from_millis(100)),
        ))
        .unwrap_err();
        assert!(matches!(err, FrameError::Transport(ref e) if e.is_timeout()));
    }
}
