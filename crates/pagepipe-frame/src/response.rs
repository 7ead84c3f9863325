//! Responses the driver writes to the renderer's stdin.

use bytes::{BufMut, Bytes, BytesMut};

use crate::message::{Headers, StartLine};

/// Largest slice [`Response::chunks`] yields: 8 KiB.
pub const MAX_CHUNK_SIZE: usize = 8 * 1024;

/// Standard reason phrase for `code`, or `""` when unknown.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        410 => "Gone",
        413 => "Content Too Large",
        415 => "Unsupported Media Type",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

/// A synthetic `HTTP/1.1` response.
///
/// Headers are serialized in insertion order. [`Response::with_body`] sets
/// `Content-Length`; everything else is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    code: u16,
    reason: String,
    headers: Headers,
    body: Bytes,
}

impl Response {
    pub fn new(code: u16) -> Self {
        Self {
            code,
            reason: reason_phrase(code).to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Attach a body and set `Content-Length` to its size.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self.headers
            .set("Content-Length", self.body.len().to_string());
        self
    }

    /// The response that carries the document to render.
    ///
    /// Header order matches what the renderer expects: `Content-Length`,
    /// `Content-Type`, `Date`, `Server`.
    pub fn document(document: impl Into<Bytes>, date: &str, server: &str) -> Self {
        let document = document.into();
        Response::new(200)
            .with_header("Content-Length", document.len().to_string())
            .with_header("Content-Type", "text/html")
            .with_header("Date", date)
            .with_header("Server", server)
            .with_body(document)
    }

    /// The bodiless response that answers the renderer's final `PUT`.
    pub fn finalize(date: &str, server: &str) -> Self {
        Response::new(200)
            .with_header("Date", date)
            .with_header("Server", server)
    }

    /// A small HTML page for an error status.
    pub fn status_page(code: u16, date: &str, server: &str) -> Self {
        let response = Response::new(code);
        let title = format!("{} {}", code, response.reason());
        let page = format!(
            "<!DOCTYPE html><title>{}</title><h1>{}</h1>",
            title.trim_end(),
            title.trim_end()
        );
        response
            .with_header("Date", date)
            .with_header("Server", server)
            .with_header("Content-Type", "text/html")
            .with_body(page)
    }

    /// A small HTML `404 Not Found`.
    pub fn not_found(date: &str, server: &str) -> Self {
        Response::status_page(404, date, server)
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub(crate) fn start_line(&self) -> StartLine {
        StartLine::Status {
            version: "HTTP/1.1".to_string(),
            code: self.code,
            reason: self.reason.clone(),
        }
    }

    /// Serialize the status line, headers and blank line only.
    pub fn encode_head(&self, dst: &mut BytesMut) {
        dst.put_slice(self.start_line().to_string().as_bytes());
        dst.put_slice(b"\r\n");
        self.headers.encode(dst);
        dst.put_slice(b"\r\n");
    }

    /// Serialize the whole response.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(128 + self.body.len());
        self.encode_head(dst);
        dst.put_slice(&self.body);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode(&mut dst);
        dst.freeze()
    }

    /// The serialized response split into slices of at most `max` bytes.
    pub fn chunks(&self, max: usize) -> impl Iterator<Item = Bytes> + Send + 'static {
        let wire = self.to_bytes();
        let max = max.max(1);
        (0..wire.len())
            .step_by(max)
            .map(move |start| wire.slice(start..(start + max).min(wire.len())))
    }
}
