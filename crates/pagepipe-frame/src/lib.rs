//! Pseudo-HTTP framing for the renderer pipe protocol.
//!
//! The renderer speaks a minimal HTTP/1.1 dialect over its standard streams:
//! - a start line (request line or status line) ending in `\r\n`
//! - header lines, terminated by a blank line
//! - an optional body, either `Content-Length` delimited or chunk encoded
//!
//! This crate parses what the renderer sends ([`AssetRequest`]), builds what
//! the driver answers ([`Response`]), and reads framed input from any
//! [`pagepipe_transport::ReadChannel`] under a deadline.

pub mod chunked;
#[cfg(any(test, feature = "test-util"))]
pub mod codec;
pub mod date;
pub mod error;
pub mod message;
pub mod reader;
pub mod request;
pub mod response;

pub use chunked::{decode_chunk, encode_chunk, encode_last_chunk, Chunk};
#[cfg(any(test, feature = "test-util"))]
pub use codec::decode_message;
pub use date::{http_date, http_date_now, HTTP_DATE_FORMAT};
pub use error::{FrameError, Result};
pub use message::{Body, Headers, PipeMessage, StartLine};
pub use reader::{consume_header_block, read_asset_request, read_body, read_header_lines};
pub use request::{AssetRequest, Method};
pub use response::{reason_phrase, Response, MAX_CHUNK_SIZE};

/// Largest header block accepted from the renderer, in bytes.
pub const MAX_HEADER_BLOCK: usize = 64 * 1024;

/// Largest request body accepted from the renderer: 16 MiB.
pub const DEFAULT_MAX_BODY: usize = 16 * 1024 * 1024;

/// Largest artifact body accepted inside the terminating `PUT`: 1 GiB.
pub const MAX_PUT_BODY: usize = 1024 * 1024 * 1024;
