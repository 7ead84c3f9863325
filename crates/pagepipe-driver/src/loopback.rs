//! Answering asset requests from an in-process request handler.
//!
//! Web applications that render their own pages usually also serve the
//! stylesheets and images those pages reference. [`LoopbackFetcher`] turns
//! each renderer request into a synthetic GET against such a handler, carrying
//! over the host, cookie and client address of the request that triggered the
//! render. The scope is passed in explicitly; nothing is read from ambient state.

use std::path::PathBuf;

use bytes::Bytes;
use pagepipe_frame::{http_date_now, Headers, Response};
use tracing::debug;

use crate::config::{DEFAULT_CHUNK_SIZE, DEFAULT_SERVER};
use crate::fetcher::{
    file_stream, response_stream, split_target, AssetFetcher, AssetStream, FetchError,
};

/// Request path that always answers with the document being rendered.
pub const DOCUMENT_PATH: &str = "/.pagepipe/document";

/// Response header naming a file to stream in place of the body.
pub const SENDFILE_HEADER: &str = "X-Sendfile";

/// Attributes of the request that triggered the render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestScope {
    pub host: String,
    pub cookie: Option<String>,
    pub remote_addr: Option<String>,
}

impl RequestScope {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
}

/// Synthetic GET handed to a [`RequestHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackRequest {
    pub path: String,
    pub query: String,
    pub headers: Headers,
}

/// In-process HTTP handler.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &LoopbackRequest) -> Result<Response, FetchError>;
}

impl<F> RequestHandler for F
where
    F: Fn(&LoopbackRequest) -> Result<Response, FetchError> + Send + Sync,
{
    fn handle(&self, request: &LoopbackRequest) -> Result<Response, FetchError> {
        self(request)
    }
}

/// Fetcher that routes asset requests to a [`RequestHandler`].
pub struct LoopbackFetcher<H> {
    handler: H,
    scope: RequestScope,
    document: Option<Bytes>,
    server: String,
    chunk_size: usize,
}

impl<H: RequestHandler> LoopbackFetcher<H> {
    pub fn new(handler: H, scope: RequestScope) -> Self {
        Self {
            handler,
            scope,
            document: None,
            server: DEFAULT_SERVER.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Serve `document` at [`DOCUMENT_PATH`].
    pub fn with_document(mut self, document: impl Into<Bytes>) -> Self {
        self.document = Some(document.into());
        self
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    fn request(&self, path: &str, query: &str) -> LoopbackRequest {
        let mut headers = Headers::new();
        headers.append("Host", self.scope.host.clone());
        headers.append("User-Agent", self.server.clone());
        if let Some(cookie) = &self.scope.cookie {
            headers.append("Cookie", cookie.clone());
        }
        if let Some(addr) = &self.scope.remote_addr {
            headers.append("X-Forwarded-For", addr.clone());
        }
        LoopbackRequest {
            path: path.to_string(),
            query: query.to_string(),
            headers,
        }
    }

    /// Rebuild the handler's response with the protocol headers in front.
    fn normalize(&self, response: Response) -> Response {
        let mut out = Response::new(response.code())
            .with_reason(response.reason())
            .with_header("Date", http_date_now())
            .with_header("Server", self.server.clone());
        if let Some(content_type) = response.headers().get("Content-Type") {
            out = out.with_header("Content-Type", content_type);
        }
        for (name, value) in response.headers().iter() {
            let skip = ["Date", "Server", "Content-Length", "Content-Type"]
                .iter()
                .any(|known| known.eq_ignore_ascii_case(name));
            if !skip {
                out = out.with_header(name, value);
            }
        }
        out.with_body(response.body().clone())
    }
}

impl<H: RequestHandler> AssetFetcher for LoopbackFetcher<H> {
    fn fetch(&self, target: &str) -> Result<AssetStream, FetchError> {
        let (path, query) = split_target(target);

        if path == DOCUMENT_PATH {
            if let Some(document) = &self.document {
                let response = Response::new(200)
                    .with_header("Date", http_date_now())
                    .with_header("Server", self.server.clone())
                    .with_header("Content-Type", "text/html")
                    .with_body(document.clone());
                return Ok(response_stream(&response));
            }
        }

        let request = self.request(path, query);
        let response = self.handler.handle(&request)?;
        debug!(path, code = response.code(), "loopback response");

        if let Some(file) = response.headers().get(SENDFILE_HEADER) {
            let file = PathBuf::from(file);
            return file_stream(
                &file,
                response.code(),
                response.headers().get("Content-Type"),
                &self.server,
                self.chunk_size,
            );
        }

        Ok(response_stream(&self.normalize(response)))
    }
}
