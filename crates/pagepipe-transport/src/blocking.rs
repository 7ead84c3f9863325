use std::future::{ready, Future};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{trace, warn};

use crate::deadline::Deadline;
use crate::error::{Result, TransportError};
use crate::traits::{Drained, ReadChannel, WriteChannel, MAX_DRAIN_CHUNK};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Longest single `poll(2)` wait; the cancel token is checked between slices.
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Cooperative cancellation flag shared between a channel and its owner.
///
/// Cloning yields a handle to the same flag, so another thread (a signal
/// handler, a watchdog) can abort I/O that is parked in `poll(2)`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Pending and future operations fail with `Cancelled`.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
enum Interest {
    Read,
    Write,
}

impl Interest {
    fn events(self) -> libc::c_short {
        match self {
            Interest::Read => libc::POLLIN,
            Interest::Write => libc::POLLOUT,
        }
    }
}

/// Switch a descriptor to non-blocking mode so a ready descriptor never parks a read or write.
fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
    // SAFETY: `fd` is an open descriptor owned by the caller for the duration of the call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    // SAFETY: same descriptor, only the status flags are updated.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Wait until `fd` is ready for `interest`, the deadline passes, or `cancel` fires.
///
/// Hang-up and error conditions count as ready; the following read or write reports them.
fn wait_ready(
    fd: RawFd,
    interest: Interest,
    deadline: &Deadline,
    cancel: &CancelToken,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let slice = deadline.remaining()?.min(POLL_SLICE);
        let millis = slice.as_micros().div_ceil(1000).min(i32::MAX as u128) as libc::c_int;

        let mut pfd = libc::pollfd {
            fd,
            events: interest.events(),
            revents: 0,
        };
        // SAFETY: `pfd` is a valid, writable pollfd and the count matches.
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(TransportError::Io(err));
        }
        if rc > 0 {
            return Ok(());
        }
    }
}

/// Read end of a pipe driven by `poll(2)` readiness.
///
/// Works with any descriptor-backed reader: `ChildStdout`, `ChildStderr`,
/// a `UnixStream` half in tests.
pub struct PollReader<T> {
    inner: T,
    buf: BytesMut,
    scratch: Vec<u8>,
    cancel: CancelToken,
    eof: bool,
}

impl<T: Read + AsRawFd> PollReader<T> {
    /// Wrap a reader, switching its descriptor to non-blocking mode.
    pub fn new(inner: T) -> Result<Self> {
        Self::with_cancel(inner, CancelToken::new())
    }

    /// Wrap a reader whose pending operations can be aborted through `cancel`.
    pub fn with_cancel(inner: T, cancel: CancelToken) -> Result<Self> {
        set_nonblocking(inner.as_raw_fd())?;
        Ok(Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            scratch: Vec::new(),
            cancel,
            eof: false,
        })
    }

    /// Append up to `max` bytes to the internal buffer. Returns 0 at end of stream.
    fn fill(&mut self, deadline: &Deadline, max: usize) -> Result<usize> {
        if self.eof {
            return Ok(0);
        }
        if self.scratch.len() < max {
            self.scratch.resize(max, 0);
        }
        loop {
            wait_ready(self.inner.as_raw_fd(), Interest::Read, deadline, &self.cancel)?;
            match self.inner.read(&mut self.scratch[..max]) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(0);
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&self.scratch[..n]);
                    return Ok(n);
                }
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::Interrupted =>
                {
                    continue;
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn read_line_now(&mut self, deadline: Deadline) -> Result<Bytes> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.buf[scanned..].iter().position(|b| *b == b'\n') {
                let end = scanned + pos + 1;
                return Ok(self.buf.split_to(end).freeze());
            }
            scanned = self.buf.len();
            if self.fill(&deadline, READ_CHUNK_SIZE)? == 0 {
                return Err(TransportError::EndOfStream);
            }
        }
    }

    fn read_exact_now(&mut self, len: usize, deadline: Deadline) -> Result<Bytes> {
        while self.buf.len() < len {
            let want = (len - self.buf.len()).min(READ_CHUNK_SIZE);
            if self.fill(&deadline, want)? == 0 {
                return Err(TransportError::EndOfStream);
            }
        }
        Ok(self.buf.split_to(len).freeze())
    }

    fn read_to_end_now(&mut self, deadline: Deadline, chunk_size: usize) -> Result<Drained> {
        let chunk_size = chunk_size.clamp(1, MAX_DRAIN_CHUNK);
        loop {
            match self.fill(&deadline, chunk_size) {
                Ok(0) => {
                    trace!(bytes = self.buf.len(), "drained pipe to end of stream");
                    return Ok(Drained {
                        bytes: self.buf.split().freeze(),
                        eof: true,
                    });
                }
                Ok(_) => continue,
                Err(TransportError::Timeout { .. }) if !self.buf.is_empty() => {
                    warn!(
                        bytes = self.buf.len(),
                        budget = ?deadline.budget(),
                        "drain deadline reached before end of stream"
                    );
                    return Ok(Drained {
                        bytes: self.buf.split().freeze(),
                        eof: false,
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// The token that aborts this reader's pending operations.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Borrow the underlying reader.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the channel and return the inner reader. Buffered bytes are dropped.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read + AsRawFd + Send> ReadChannel for PollReader<T> {
    fn read_line(&mut self, deadline: Deadline) -> impl Future<Output = Result<Bytes>> + Send {
        ready(self.read_line_now(deadline))
    }

    fn read_exact(
        &mut self,
        len: usize,
        deadline: Deadline,
    ) -> impl Future<Output = Result<Bytes>> + Send {
        ready(self.read_exact_now(len, deadline))
    }

    fn read_to_end(
        &mut self,
        deadline: Deadline,
        chunk_size: usize,
    ) -> impl Future<Output = Result<Drained>> + Send {
        ready(self.read_to_end_now(deadline, chunk_size))
    }
}

/// Write end of a pipe driven by `poll(2)` readiness.
pub struct PollWriter<T: AsRawFd> {
    inner: Option<T>,
    cancel: CancelToken,
    poisoned: bool,
    half_closed: bool,
}

impl<T: Write + AsRawFd> PollWriter<T> {
    /// Wrap a writer, switching its descriptor to non-blocking mode.
    pub fn new(inner: T) -> Result<Self> {
        Self::with_cancel(inner, CancelToken::new())
    }

    /// Wrap a writer whose pending operations can be aborted through `cancel`.
    pub fn with_cancel(inner: T, cancel: CancelToken) -> Result<Self> {
        set_nonblocking(inner.as_raw_fd())?;
        Ok(Self {
            inner: Some(inner),
            cancel,
            poisoned: false,
            half_closed: false,
        })
    }

    fn write_all_now(&mut self, buf: &[u8], deadline: Deadline) -> Result<()> {
        if self.poisoned {
            return Err(TransportError::Poisoned);
        }
        let result = self.write_unpoisoned(buf, deadline);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn write_unpoisoned(&mut self, buf: &[u8], deadline: Deadline) -> Result<()> {
        if self.half_closed {
            return Err(TransportError::Closed);
        }
        let cancel = self.cancel.clone();
        let inner = self.inner.as_mut().ok_or(TransportError::Closed)?;
        let fd = inner.as_raw_fd();

        let mut offset = 0usize;
        while offset < buf.len() {
            wait_ready(fd, Interest::Write, &deadline, &cancel)?;
            match inner.write(&buf[offset..]) {
                Ok(0) => {
                    return Err(TransportError::Io(std::io::Error::from(
                        ErrorKind::WriteZero,
                    )))
                }
                Ok(n) => offset += n,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::Interrupted =>
                {
                    continue;
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        trace!(bytes = buf.len(), "wrote to pipe");
        Ok(())
    }

    fn close_write_now(&mut self) -> Result<()> {
        let Some(inner) = self.inner.as_ref() else {
            return Ok(());
        };
        if self.half_closed {
            return Ok(());
        }
        // SAFETY: the descriptor is open while `inner` is alive.
        let rc = unsafe { libc::shutdown(inner.as_raw_fd(), libc::SHUT_WR) };
        if rc == 0 {
            self.half_closed = true;
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOTSOCK) {
            // Pipes are one-directional: closing the descriptor is the half-close.
            self.inner = None;
            return Ok(());
        }
        self.inner = None;
        Err(TransportError::Io(err))
    }

    /// The token that aborts this writer's pending operations.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Whether the write side has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none() || self.half_closed
    }
}

impl<T: Write + AsRawFd + Send> WriteChannel for PollWriter<T> {
    fn write_all(
        &mut self,
        buf: &[u8],
        deadline: Deadline,
    ) -> impl Future<Output = Result<()>> + Send {
        ready(self.write_all_now(buf, deadline))
    }

    fn close_write(&mut self) -> impl Future<Output = Result<()>> + Send {
        ready(self.close_write_now())
    }

    fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    use pollster::block_on;

    use super::*;

    fn pair() -> (UnixStream, UnixStream) {
        UnixStream::pair().unwrap()
    }

    #[test]
    fn read_line_keeps_bytes_past_terminator() {
        let (mut left, right) = pair();
        left.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\ntail").unwrap();

        let mut reader = PollReader::new(right).unwrap();
        let deadline = Deadline::after(Duration::from_secs(1));

        let first = block_on(reader.read_line(deadline)).unwrap();
        let second = block_on(reader.read_line(deadline)).unwrap();
        let third = block_on(reader.read_line(deadline)).unwrap();

        assert_eq!(first.as_ref(), b"GET / HTTP/1.1\r\n");
        assert_eq!(second.as_ref(), b"Host: x\r\n");
        assert_eq!(third.as_ref(), b"\r\n");

        drop(left);
        let rest = block_on(reader.read_to_end(deadline, 4)).unwrap();
        assert_eq!(rest.bytes.as_ref(), b"tail");
        assert!(rest.eof);
    }

    #[test]
    fn read_line_end_of_stream_without_terminator() {
        let (mut left, right) = pair();
        left.write_all(b"partial").unwrap();
        drop(left);

        let mut reader = PollReader::new(right).unwrap();
        let err = block_on(reader.read_line(Deadline::after(Duration::from_secs(1)))).unwrap_err();
        assert!(matches!(err, TransportError::EndOfStream));
    }

    #[test]
    fn read_line_times_out_against_silent_peer() {
        let (_left, right) = pair();
        let mut reader = PollReader::new(right).unwrap();

        let budget = Duration::from_millis(120);
        let started = Instant::now();
        let err = block_on(reader.read_line(Deadline::after(budget))).unwrap_err();
        let elapsed = started.elapsed();

        assert!(err.is_timeout());
        assert!(elapsed >= budget);
        assert!(elapsed < budget + Duration::from_millis(500));
    }

    #[test]
    fn read_line_times_out_when_terminator_never_arrives() {
        let (mut left, right) = pair();
        left.write_all(b"no newline here").unwrap();
        let mut reader = PollReader::new(right).unwrap();

        let err =
            block_on(reader.read_line(Deadline::after(Duration::from_millis(80)))).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn read_exact_spans_several_writes() {
        let (mut left, right) = pair();
        let writer = std::thread::spawn(move || {
            left.write_all(b"abc").unwrap();
            std::thread::sleep(Duration::from_millis(20));
            left.write_all(b"defgh").unwrap();
        });

        let mut reader = PollReader::new(right).unwrap();
        let got = block_on(reader.read_exact(6, Deadline::after(Duration::from_secs(2)))).unwrap();
        assert_eq!(got.as_ref(), b"abcdef");
        writer.join().unwrap();
    }

    #[test]
    fn read_to_end_with_nothing_received_times_out() {
        let (_left, right) = pair();
        let mut reader = PollReader::new(right).unwrap();

        let err = block_on(reader.read_to_end(Deadline::after(Duration::from_millis(60)), 16))
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn read_to_end_returns_partial_data_at_deadline() {
        let (mut left, right) = pair();
        left.write_all(b"%PDF-1.7 first half").unwrap();
        let mut reader = PollReader::new(right).unwrap();

        let drained =
            block_on(reader.read_to_end(Deadline::after(Duration::from_millis(80)), 4)).unwrap();
        assert_eq!(drained.bytes.as_ref(), b"%PDF-1.7 first half");
        assert!(!drained.eof);
        drop(left);
    }

    #[test]
    fn cancel_aborts_pending_read() {
        let (_left, right) = pair();
        let cancel = CancelToken::new();
        let mut reader = PollReader::with_cancel(right, cancel.clone()).unwrap();

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        });

        let started = Instant::now();
        let err = block_on(reader.read_line(Deadline::after(Duration::from_secs(10)))).unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
        canceller.join().unwrap();
    }

    #[test]
    fn write_all_times_out_and_poisons() {
        let (left, _right) = pair();
        let mut writer = PollWriter::new(left).unwrap();

        // Nobody drains `_right`, so the socket buffer fills up.
        let big = vec![0x5A; 8 * 1024 * 1024];
        let deadline = Deadline::after(Duration::from_millis(100));
        let err = block_on(writer.write_all(&big, deadline)).unwrap_err();
        assert!(err.is_timeout());
        assert!(writer.is_poisoned());

        let err = block_on(writer.write_all(b"x", Deadline::after(Duration::from_secs(1))))
            .unwrap_err();
        assert!(matches!(err, TransportError::Poisoned));
    }

    #[test]
    fn write_all_then_half_close_lets_peer_see_eof() {
        let (left, mut right) = pair();
        let mut writer = PollWriter::new(left).unwrap();

        let deadline = Deadline::after(Duration::from_secs(1));
        block_on(writer.write_all(b"HTTP/1.1 200 OK\r\n\r\n", deadline)).unwrap();
        block_on(writer.close_write()).unwrap();
        assert!(writer.is_closed());

        let mut received = Vec::new();
        right.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"HTTP/1.1 200 OK\r\n\r\n");

        let err = block_on(writer.write_all(b"late", Deadline::after(Duration::from_secs(1))))
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn close_write_on_pipe_drops_descriptor() {
        let mut child = std::process::Command::new("cat")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .spawn()
            .unwrap();
        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();

        let mut writer = PollWriter::new(stdin).unwrap();
        let mut reader = PollReader::new(stdout).unwrap();
        let deadline = Deadline::after(Duration::from_secs(5));

        block_on(writer.write_all(b"echoed", deadline)).unwrap();
        block_on(writer.close_write()).unwrap();

        let drained = block_on(reader.read_to_end(deadline, 64)).unwrap();
        assert_eq!(drained.bytes.as_ref(), b"echoed");
        assert!(drained.eof);
        child.wait().unwrap();
    }
}
