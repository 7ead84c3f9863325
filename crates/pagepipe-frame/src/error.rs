use pagepipe_transport::TransportError;

/// Errors that can occur while parsing or reading pseudo-HTTP messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The request line is not exactly `METHOD TARGET HTTP/x.y`.
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    /// The request uses a method the protocol does not define.
    #[error("unsupported method {method:?} in request line {line:?}")]
    UnsupportedMethod { method: String, line: String },

    /// The status line is not `HTTP/x.y CODE [REASON]`.
    #[error("malformed status line: {0:?}")]
    MalformedStatusLine(String),

    /// A header line has no `name: value` shape.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// A line is not valid UTF-8.
    #[error("line is not valid UTF-8")]
    NotUtf8,

    /// `Content-Length` is not a decimal byte count.
    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),

    /// A chunk size line is not hexadecimal.
    #[error("invalid chunk size line: {0:?}")]
    InvalidChunkSize(String),

    /// Chunk data is not followed by `\r\n`.
    #[error("chunk data not terminated by CRLF")]
    MissingChunkTerminator,

    /// The header block exceeds the accepted size.
    #[error("header block larger than {max} bytes")]
    HeaderBlockTooLarge { max: usize },

    /// The body exceeds the accepted size.
    #[error("body too large ({size} bytes, max {max})")]
    BodyTooLarge { size: usize, max: usize },

    /// The underlying channel failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl FrameError {
    /// Whether the failure is a syntax problem rather than an I/O one.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, FrameError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
