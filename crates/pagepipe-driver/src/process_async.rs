//! Renderer process lifecycle on the tokio runtime.

use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use pagepipe_transport::{AsyncReader, AsyncWriter};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{RenderError, Result};
use crate::process::{send_signal, ChildProcess, StopMode};

/// Owns a renderer spawned with `tokio::process`.
///
/// The child is spawned with `kill_on_drop`, so dropping the supervisor (or
/// a future holding it) kills the renderer; tokio reaps it in the background.
pub struct AsyncSupervisor {
    child: Child,
    stdin: AsyncWriter<ChildStdin>,
    stdout: AsyncReader<ChildStdout>,
    stderr: AsyncReader<ChildStderr>,
    status: Option<ExitStatus>,
}

impl AsyncSupervisor {
    /// Start `binary` with `args` and all three streams piped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(binary: &Path, args: &[OsString]) -> Result<Self> {
        let launch_error = |source: io::Error| RenderError::Launch {
            binary: binary.to_path_buf(),
            source,
        };
        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(launch_error)?;

        let missing = |name: &str| {
            launch_error(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("{name} not captured"),
            ))
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        info!(pid = child.id(), binary = %binary.display(), ?args, "spawned renderer");
        Ok(Self {
            child,
            stdin: AsyncWriter::new(stdin),
            stdout: AsyncReader::new(stdout),
            stderr: AsyncReader::new(stderr),
            status: None,
        })
    }

    /// Exit status, if the child has been reaped.
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    fn try_status(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    async fn wait_timeout(&mut self, grace: Duration) -> io::Result<Option<ExitStatus>> {
        if let Some(status) = self.try_status()? {
            return Ok(Some(status));
        }
        match timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                self.status = Some(status);
                Ok(Some(status))
            }
            Err(_) => Ok(None),
        }
    }

    async fn kill_now(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.try_status()? {
            return Ok(status);
        }
        self.child.start_kill()?;
        let status = self.child.wait().await?;
        self.status = Some(status);
        Ok(status)
    }
}

impl ChildProcess for AsyncSupervisor {
    type Stdin = AsyncWriter<ChildStdin>;
    type Stdout = AsyncReader<ChildStdout>;
    type Stderr = AsyncReader<ChildStderr>;

    fn id(&self) -> Option<u32> {
        self.child.id()
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
        async move { Ok(self.wait_timeout(grace).await?.is_some()) }
    }

    fn kill(&mut self) -> impl Future<Output = io::Result<ExitStatus>> + Send {
        self.kill_now()
    }

    fn shutdown(&mut self, grace: Duration) -> impl Future<Output = io::Result<ExitStatus>> + Send {
        async move {
            if let Some(status) = self.wait_timeout(grace).await? {
                return Ok(status);
            }
            if let Some(pid) = self.child.id() {
                debug!(pid, "renderer still running, sending SIGTERM");
                send_signal(pid, StopMode::Graceful)?;
            }
            if let Some(status) = self.wait_timeout(grace).await? {
                warn!("renderer did not exit on its own, terminated it");
                return Ok(status);
            }
            warn!("renderer ignored SIGTERM, killing it");
            self.kill_now().await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use pagepipe_transport::{Deadline, ReadChannel, WriteChannel};

    use super::*;

    fn sh(script: &str) -> AsyncSupervisor {
        AsyncSupervisor::spawn(
            Path::new("/bin/sh"),
            &[OsString::from("-c"), OsString::from(script)],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn pipes_are_wired() {
        let mut supervisor = sh("read line; echo \"got $line\"");
        supervisor
            .stdin()
            .write_all(b"hi\n", Deadline::after(Duration::from_secs(2)))
            .await
            .unwrap();
        let line = supervisor
            .stdout()
            .read_line(Deadline::after(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(line.as_ref(), b"got hi\n");
        let status = supervisor.shutdown(Duration::from_secs(2)).await.unwrap();
        assert!(status.success());
        assert_eq!(supervisor.id(), None);
    }

    #[tokio::test]
    async fn shutdown_escalates() {
        let mut supervisor = sh("exec sleep 30");
        let started = Instant::now();
        let status = supervisor
            .shutdown(Duration::from_millis(100))
            .await
            .unwrap();
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn kill_reaps() {
        let mut supervisor = sh("exec sleep 30");
        assert!(!supervisor.has_exited().unwrap());
        supervisor.kill().await.unwrap();
        assert!(supervisor.has_exited().unwrap());
        assert!(supervisor.status().is_some());
    }
}
