use std::future::Future;

use bytes::Bytes;

use crate::deadline::Deadline;
use crate::error::Result;

/// Everything a drain collected before it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drained {
    /// Bytes read, in order.
    pub bytes: Bytes,
    /// `true` when the peer closed its end; `false` when the deadline cut the drain short.
    pub eof: bool,
}

/// The read end of a pipe with deadline-bounded operations.
///
/// Implementations buffer internally: bytes read past a line terminator are
/// kept for the next call. The futures are `Send` so one driver core can run
/// on any executor; blocking implementations complete them on first poll.
pub trait ReadChannel: Send {
    /// Read one line including its `\n` terminator.
    ///
    /// Fails with `Timeout` if the deadline elapses first and with
    /// `EndOfStream` if the peer closes before a terminator is seen.
    fn read_line(&mut self, deadline: Deadline) -> impl Future<Output = Result<Bytes>> + Send;

    /// Read exactly `len` bytes.
    fn read_exact(
        &mut self,
        len: usize,
        deadline: Deadline,
    ) -> impl Future<Output = Result<Bytes>> + Send;

    /// Read until the peer closes, `chunk_size` bytes at a time.
    ///
    /// `chunk_size` is clamped to `1..=MAX_DRAIN_CHUNK`.
    ///
    /// One deadline bounds the whole drain. If it expires before any byte
    /// arrived the call fails with `Timeout`; otherwise the bytes read so
    /// far are returned with `eof == false`.
    fn read_to_end(
        &mut self,
        deadline: Deadline,
        chunk_size: usize,
    ) -> impl Future<Output = Result<Drained>> + Send;
}

/// Largest per-read buffer a drain allocates: 1 MiB.
pub const MAX_DRAIN_CHUNK: usize = 1024 * 1024;

/// The write end of a pipe with deadline-bounded operations.
pub trait WriteChannel: Send {
    /// Write the whole buffer, retrying partial writes until the deadline.
    ///
    /// A write that times out or fails poisons the channel: the peer may
    /// hold a partial message, so every later write fails with `Poisoned`.
    fn write_all(
        &mut self,
        buf: &[u8],
        deadline: Deadline,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Signal end of input to the peer.
    ///
    /// Half-closes when the endpoint supports it, otherwise closes the
    /// write end entirely.
    fn close_write(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Whether an earlier failure poisoned this channel.
    fn is_poisoned(&self) -> bool;
}
