//! Whole-message model: start line, ordered headers, body.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Header fields in insertion order with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, keeping any existing field of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace the first field named `name` in place, or append it.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Value of the first field named `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove every field named `name`, returning how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse one `name: value` line. The line terminator must already be stripped.
    pub fn parse_line(line: &str) -> Result<(String, String)> {
        match line.split_once(':') {
            Some((name, value)) if !name.is_empty() && !name.contains(char::is_whitespace) => {
                Ok((name.to_string(), value.trim().to_string()))
            }
            _ => Err(FrameError::MalformedHeader(line.to_string())),
        }
    }

    /// Declared `Content-Length`, if any.
    pub fn content_length(&self) -> Result<Option<usize>> {
        match self.get("Content-Length") {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map(Some)
                .map_err(|_| FrameError::InvalidContentLength(raw.to_string())),
        }
    }

    /// Whether the body uses chunked transfer coding.
    pub fn is_chunked(&self) -> bool {
        self.get("Transfer-Encoding")
            .map(|value| {
                value
                    .split(',')
                    .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
            })
            .unwrap_or(false)
    }

    pub(crate) fn encode(&self, dst: &mut BytesMut) {
        for (name, value) in &self.entries {
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
    }
}

/// First line of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    /// `METHOD TARGET HTTP/x.y`, sent by the renderer.
    Request {
        method: String,
        target: String,
        version: String,
    },
    /// `HTTP/x.y CODE REASON`, sent by the driver.
    Status {
        version: String,
        code: u16,
        reason: String,
    },
}

impl StartLine {
    /// Parse a start line without its terminator.
    pub fn parse(line: &str) -> Result<Self> {
        if line.starts_with("HTTP/") {
            let mut parts = line.splitn(3, ' ');
            let version = parts.next().unwrap_or_default();
            let code = parts
                .next()
                .filter(|code| code.len() == 3)
                .and_then(|code| code.parse::<u16>().ok())
                .ok_or_else(|| FrameError::MalformedStatusLine(line.to_string()))?;
            let reason = parts.next().unwrap_or_default();
            return Ok(StartLine::Status {
                version: version.to_string(),
                code,
                reason: reason.to_string(),
            });
        }

        let parts: Vec<&str> = line.split(' ').collect();
        match parts.as_slice() {
            [method, target, version]
                if !method.is_empty() && !target.is_empty() && version.starts_with("HTTP/") =>
            {
                Ok(StartLine::Request {
                    method: method.to_string(),
                    target: target.to_string(),
                    version: version.to_string(),
                })
            }
            _ => Err(FrameError::MalformedRequestLine(line.to_string())),
        }
    }
}

impl fmt::Display for StartLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartLine::Request {
                method,
                target,
                version,
            } => write!(f, "{method} {target} {version}"),
            StartLine::Status {
                version,
                code,
                reason,
            } if reason.is_empty() => write!(f, "{version} {code}"),
            StartLine::Status {
                version,
                code,
                reason,
            } => write!(f, "{version} {code} {reason}"),
        }
    }
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Body {
    #[default]
    Empty,
    /// Length-delimited by `Content-Length`.
    Sized(Bytes),
    /// Chunk-encoded; the zero-size terminator is implicit.
    Chunked(Vec<Bytes>),
}

impl Body {
    /// Body bytes with chunk boundaries removed.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Body::Empty => Bytes::new(),
            Body::Sized(bytes) => bytes.clone(),
            Body::Chunked(chunks) => {
                let mut out = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
                for chunk in chunks {
                    out.extend_from_slice(chunk);
                }
                out.freeze()
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Body::Empty => 0,
            Body::Sized(bytes) => bytes.len(),
            Body::Chunked(chunks) => chunks.iter().map(Bytes::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One complete pseudo-HTTP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeMessage {
    pub start: StartLine,
    pub headers: Headers,
    pub body: Body,
}

fn strip_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Text of a line with its `\r\n` or `\n` terminator removed.
pub(crate) fn line_text(line: &[u8]) -> Result<&str> {
    std::str::from_utf8(strip_line_end(line)).map_err(|_| FrameError::NotUtf8)
}
