//! Requests the renderer sends while it lays out the document.

use std::fmt;

use bytes::Bytes;

use crate::error::{FrameError, Result};
use crate::message::{Headers, StartLine};

/// Methods the renderer may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Fetch an auxiliary asset.
    Get,
    /// Rendering finished; the target is ignored.
    Put,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request read from the renderer's stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetRequest {
    /// `GET <path> HTTP/x.y`
    Get {
        path: String,
        version: String,
        headers: Headers,
    },
    /// `PUT <ignored> HTTP/x.y`, with whatever body the renderer attached.
    Put {
        version: String,
        headers: Headers,
        body: Bytes,
    },
}

impl AssetRequest {
    /// Parse a request line into its method, target and version.
    ///
    /// The line must be exactly three space-separated tokens; the method must be
    /// `GET` or `PUT`.
    pub fn parse_line(line: &str) -> Result<(Method, String, String)> {
        let StartLine::Request {
            method,
            target,
            version,
        } = StartLine::parse(line)?
        else {
            return Err(FrameError::MalformedRequestLine(line.to_string()));
        };
        let method = match method.as_str() {
            "GET" => Method::Get,
            "PUT" => Method::Put,
            _ => {
                return Err(FrameError::UnsupportedMethod {
                    method,
                    line: line.to_string(),
                })
            }
        };
        Ok((method, target, version))
    }

    pub fn method(&self) -> Method {
        match self {
            AssetRequest::Get { .. } => Method::Get,
            AssetRequest::Put { .. } => Method::Put,
        }
    }

    /// Requested asset path; `None` for the terminating `PUT`.
    pub fn path(&self) -> Option<&str> {
        match self {
            AssetRequest::Get { path, .. } => Some(path),
            AssetRequest::Put { .. } => None,
        }
    }

    pub fn headers(&self) -> &Headers {
        match self {
            AssetRequest::Get { headers, .. } | AssetRequest::Put { headers, .. } => headers,
        }
    }

    /// Whether this request ends the asset phase.
    pub fn is_final(&self) -> bool {
        matches!(self, AssetRequest::Put { .. })
    }
}
