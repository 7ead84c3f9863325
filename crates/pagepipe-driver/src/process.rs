//! Renderer process lifecycle.
//!
//! A supervisor owns the child and its three pipes. Whatever happens to the
//! conversation, the child is terminated and reaped before the supervisor
//! goes away.

use std::ffi::OsString;
use std::future::{ready, Future};
use std::io;
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use pagepipe_transport::{
    CancelToken, PollReader, PollWriter, ReadChannel, TransportError, WriteChannel,
};
use tracing::{debug, info, warn};

use crate::error::{RenderError, Result};

/// Interval between exit checks while waiting on a child.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How the child is asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// SIGTERM: let the renderer clean up.
    Graceful,
    /// SIGKILL.
    Force,
}

impl StopMode {
    fn signal(self) -> libc::c_int {
        match self {
            StopMode::Graceful => libc::SIGTERM,
            StopMode::Force => libc::SIGKILL,
        }
    }
}

/// Send `mode`'s signal to `pid`. A process that is already gone is not an error.
pub(crate) fn send_signal(pid: u32, mode: StopMode) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: plain syscall on a pid we spawned and have not reaped yet.
    let rc = unsafe { libc::kill(pid, mode.signal()) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err)
}

/// A running renderer as seen by the protocol driver.
///
/// The driver borrows the three channels one at a time; the implementation
/// decides how they block. Every method that waits returns a `Send` future.
pub trait ChildProcess: Send {
    type Stdin: WriteChannel;
    type Stdout: ReadChannel;
    type Stderr: ReadChannel;

    /// OS process id, while the child has not been reaped.
    fn id(&self) -> Option<u32>;

    fn stdin(&mut self) -> &mut Self::Stdin;

    fn stdout(&mut self) -> &mut Self::Stdout;

    fn stderr(&mut self) -> &mut Self::Stderr;

    /// Whether the child has exited, without waiting.
    fn has_exited(&mut self) -> io::Result<bool>;

    /// Whether the child exits within `grace`.
    fn exited_within(&mut self, grace: Duration) -> impl Future<Output = io::Result<bool>> + Send;

    /// Kill the child immediately and reap it.
    fn kill(&mut self) -> impl Future<Output = io::Result<ExitStatus>> + Send;

    /// Wait up to `grace` for a voluntary exit, then SIGTERM and wait up to
    /// `grace` again, then SIGKILL. The child is always reaped.
    fn shutdown(&mut self, grace: Duration) -> impl Future<Output = io::Result<ExitStatus>> + Send;
}

fn launch_error(binary: &Path, source: io::Error) -> RenderError {
    RenderError::Launch {
        binary: binary.to_path_buf(),
        source,
    }
}

fn channel_io(err: TransportError) -> io::Error {
    match err {
        TransportError::Io(err) => err,
        other => io::Error::other(other),
    }
}

/// Owns a renderer spawned with `std::process` and polled pipes.
pub struct Supervisor {
    child: Child,
    stdin: PollWriter<ChildStdin>,
    stdout: PollReader<ChildStdout>,
    stderr: PollReader<ChildStderr>,
    status: Option<ExitStatus>,
}

impl Supervisor {
    /// Start `binary` with `args` and all three streams piped.
    pub fn spawn(binary: &Path, args: &[OsString]) -> Result<Self> {
        Self::spawn_with_cancel(binary, args, CancelToken::new())
    }

    /// Like [`Supervisor::spawn`]; `cancel` aborts pending pipe I/O.
    pub fn spawn_with_cancel(
        binary: &Path,
        args: &[OsString],
        cancel: CancelToken,
    ) -> Result<Self> {
        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| launch_error(binary, err))?;

        match Self::wrap_pipes(&mut child, cancel) {
            Ok((stdin, stdout, stderr)) => {
                info!(pid = child.id(), binary = %binary.display(), ?args, "spawned renderer");
                Ok(Self {
                    child,
                    stdin,
                    stdout,
                    stderr,
                    status: None,
                })
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(launch_error(binary, err))
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn wrap_pipes(
        child: &mut Child,
        cancel: CancelToken,
    ) -> io::Result<(
        PollWriter<ChildStdin>,
        PollReader<ChildStdout>,
        PollReader<ChildStderr>,
    )> {
        let missing =
            |name: &str| io::Error::new(io::ErrorKind::BrokenPipe, format!("{name} not captured"));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
        Ok((
            PollWriter::with_cancel(stdin, cancel.clone()).map_err(channel_io)?,
            PollReader::with_cancel(stdout, cancel.clone()).map_err(channel_io)?,
            PollReader::with_cancel(stderr, cancel).map_err(channel_io)?,
        ))
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Exit status, if the child has been reaped.
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Reap the child if it has exited.
    pub fn try_status(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    /// Wait up to `timeout` for the child to exit.
    pub fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        let started = Instant::now();
        loop {
            if let Some(status) = self.try_status()? {
                return Ok(Some(status));
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Ok(None);
            }
            std::thread::sleep(EXIT_POLL_INTERVAL.min(timeout - elapsed));
        }
    }

    /// Signal the child without waiting.
    pub fn signal(&mut self, mode: StopMode) -> io::Result<()> {
        if self.try_status()?.is_some() {
            return Ok(());
        }
        send_signal(self.child.id(), mode)
    }

    /// SIGKILL and reap.
    pub fn kill_now(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.try_status()? {
            return Ok(status);
        }
        self.signal(StopMode::Force)?;
        let status = self.child.wait()?;
        self.status = Some(status);
        Ok(status)
    }

    /// Graceful-then-forced termination; see [`ChildProcess::shutdown`].
    pub fn terminate(&mut self, grace: Duration) -> io::Result<ExitStatus> {
        if let Some(status) = self.wait_timeout(grace)? {
            return Ok(status);
        }
        debug!(pid = self.child.id(), "renderer still running, sending SIGTERM");
        self.signal(StopMode::Graceful)?;
        if let Some(status) = self.wait_timeout(grace)? {
            warn!(pid = self.child.id(), "renderer did not exit on its own, terminated it");
            return Ok(status);
        }
        warn!(pid = self.child.id(), "renderer ignored SIGTERM, killing it");
        self.kill_now()
    }
}

impl ChildProcess for Supervisor {
    type Stdin = PollWriter<ChildStdin>;
    type Stdout = PollReader<ChildStdout>;
    type Stderr = PollReader<ChildStderr>;

    fn id(&self) -> Option<u32> {
        self.status.is_none().then(|| self.child.id())
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
        Ok(self.try_status()?.is_some())
    }

    fn exited_within(&mut self, grace: Duration) -> impl Future<Output = io::Result<bool>> + Send {
        ready(self.wait_timeout(grace).map(|status| status.is_some()))
    }

    fn kill(&mut self) -> impl Future<Output = io::Result<ExitStatus>> + Send {
        ready(self.kill_now())
    }

    fn shutdown(&mut self, grace: Duration) -> impl Future<Output = io::Result<ExitStatus>> + Send {
        ready(self.terminate(grace))
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.status.is_some() {
            return;
        }
        match self.kill_now() {
            Ok(status) => debug!(%status, "renderer reaped on drop"),
            Err(err) => warn!(error = %err, "failed to reap renderer on drop"),
        }
    }
}
