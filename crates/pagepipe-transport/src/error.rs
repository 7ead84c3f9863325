use std::time::Duration;

/// Errors that can occur on a pipe channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The operation did not complete before its deadline.
    #[error("operation timed out after {budget:?}")]
    Timeout { budget: Duration },

    /// The peer closed its end before the requested data arrived.
    #[error("end of stream")]
    EndOfStream,

    /// A previous write timed out or failed, so the peer may hold a partial message.
    #[error("channel poisoned by an earlier failed write")]
    Poisoned,

    /// The write side was already closed.
    #[error("channel closed for writing")]
    Closed,

    /// The pending operation was aborted through its cancel token.
    #[error("operation cancelled")]
    Cancelled,

    /// An I/O error occurred on the pipe.
    #[error("pipe I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
