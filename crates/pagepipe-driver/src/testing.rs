//! Scripted in-memory child for driver tests.

use std::future::{ready, Future};
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use bytes::BytesMut;
use pagepipe_transport::{PollReader, PollWriter};

use crate::process::ChildProcess;

/// A child whose stdout and stderr are fixed scripts and whose stdin is captured.
///
/// The driver never waits on the child between requests, so a fully
/// pre-written stdout plays the same role as a live renderer.
pub(crate) struct FakeChild {
    stdin: PollWriter<UnixStream>,
    stdout: PollReader<UnixStream>,
    stderr: PollReader<UnixStream>,
    stdin_peer: UnixStream,
    stdout_peer: Option<UnixStream>,
    captured: BytesMut,
    exit_at_check: Option<usize>,
    checks: usize,
    exited: bool,
    pub(crate) killed: bool,
    pub(crate) shutdown_called: bool,
}

impl FakeChild {
    pub(crate) fn new(stdout: &[u8], stderr: &[u8]) -> Self {
        let mut child = Self::with_open_stdout(stdout, stderr);
        child.stdout_peer = None;
        child
    }

    /// Like [`FakeChild::new`], but stdout never reaches end of stream.
    pub(crate) fn with_open_stdout(stdout: &[u8], stderr: &[u8]) -> Self {
        let (stdin_local, stdin_peer) = UnixStream::pair().unwrap();
        let (mut stdout_peer, stdout_local) = UnixStream::pair().unwrap();
        let (mut stderr_peer, stderr_local) = UnixStream::pair().unwrap();
        stdout_peer.write_all(stdout).unwrap();
        stderr_peer.write_all(stderr).unwrap();
        drop(stderr_peer);
        stdin_peer.set_nonblocking(true).unwrap();

        Self {
            stdin: PollWriter::new(stdin_local).unwrap(),
            stdout: PollReader::new(stdout_local).unwrap(),
            stderr: PollReader::new(stderr_local).unwrap(),
            stdin_peer,
            stdout_peer: Some(stdout_peer),
            captured: BytesMut::new(),
            exit_at_check: None,
            checks: 0,
            exited: false,
            killed: false,
            shutdown_called: false,
        }
    }

    /// Report the child as exited from the `n`-th exit check on (1-based).
    pub(crate) fn exit_at_check(&mut self, n: usize) {
        self.exit_at_check = Some(n);
    }

    fn pull(&mut self) {
        let mut buf = [0u8; 4096];
        loop {
            match self.stdin_peer.read(&mut buf) {
                Ok(0) => return,
                Ok(n) => self.captured.extend_from_slice(&buf[..n]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => panic!("reading captured stdin failed: {err}"),
            }
        }
    }

    /// Everything the driver wrote to stdin so far.
    pub(crate) fn sent(&mut self) -> BytesMut {
        self.pull();
        self.captured.clone()
    }

    pub(crate) fn stdin_closed(&self) -> bool {
        self.stdin.is_closed()
    }
}

impl ChildProcess for FakeChild {
    type Stdin = PollWriter<UnixStream>;
    type Stdout = PollReader<UnixStream>;
    type Stderr = PollReader<UnixStream>;

    fn id(&self) -> Option<u32> {
        (!self.exited).then_some(4242)
    }

    fn stdin(&mut self) -> &mut Self::Stdin {
        &mut self.stdin
    }

    fn stdout(&mut self) -> &mut Self::Stdout {
        &mut self.stdout
    }

    fn stderr(&mut self) -> &mut Self::Stderr {
        &mut self.stderr
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        self.checks += 1;
        if self.exit_at_check.is_some_and(|n| self.checks >= n) {
            self.exited = true;
        }
        Ok(self.exited)
    }

    fn exited_within(&mut self, _grace: Duration) -> impl Future<Output = io::Result<bool>> + Send {
        ready(self.has_exited())
    }

    fn kill(&mut self) -> impl Future<Output = io::Result<ExitStatus>> + Send {
        self.killed = true;
        self.exited = true;
        self.stdout_peer = None;
        ready(Ok(ExitStatus::from_raw(libc::SIGKILL)))
    }

    fn shutdown(
        &mut self,
        _grace: Duration,
    ) -> impl Future<Output = io::Result<ExitStatus>> + Send {
        self.shutdown_called = true;
        self.exited = true;
        ready(Ok(ExitStatus::from_raw(0)))
    }
}
