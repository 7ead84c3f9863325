//! The renderer conversation as a phase state machine.
//!
//! ```text
//! Spawning -> SendingDocument -> ServingAssets -> Finalizing -> Draining -> Closed
//!                  \                  \                \            \
//!                   +------------------+----------------+------------+--> Failed
//! ```
//!
//! One async implementation serves both call surfaces: the blocking adapter
//! runs it over polled pipes with `pollster`, the async adapter over tokio
//! pipes. Phases run strictly in order and asset requests are answered one at
//! a time, in the order the renderer sends them.

use std::process::ExitStatus;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use pagepipe_frame::{
    consume_header_block, http_date_now, read_asset_request, AssetRequest, FrameError, Response,
};
use pagepipe_transport::{Deadline, ReadChannel, TransportError, WriteChannel};
use tracing::{debug, trace, warn};

use crate::config::Timeouts;
use crate::error::{RenderError, Result};
use crate::fetcher::{response_stream, AssetFetcher, AssetStream, FetchError};
pub use crate::phase::Phase;
use crate::process::ChildProcess;
use crate::request::{RenderMode, RenderRequest};

/// How long a failed write waits for the child to exit before reporting a crash.
const EXIT_GRACE: Duration = Duration::from_millis(200);

/// Upper bound for collecting stderr after a crash.
const CRASH_STDERR_BUDGET: Duration = Duration::from_secs(1);

/// Everything a finished render produced.
#[derive(Debug, Clone)]
pub struct Output {
    /// Rendered artifact read from stdout.
    pub artifact: Bytes,
    /// Diagnostics read from stderr.
    pub diagnostics: Bytes,
    /// Number of asset requests answered.
    pub assets_served: usize,
    /// Exit status, if the child could be reaped.
    pub exit_status: Option<ExitStatus>,
}

impl Output {
    pub fn diagnostics_lossy(&self) -> String {
        String::from_utf8_lossy(&self.diagnostics).into_owned()
    }
}

/// Check `artifact` against what `mode` promises.
pub fn validate_output(mode: RenderMode, artifact: &[u8], stderr: &[u8]) -> Result<()> {
    match mode.expected_prefix() {
        Some(prefix) if !artifact.starts_with(prefix.as_bytes()) => {
            Err(RenderError::InvalidOutput {
                expected: prefix,
                stderr: String::from_utf8_lossy(stderr).into_owned(),
            })
        }
        _ => Ok(()),
    }
}

/// Drain stdout and then stderr, each under a fresh `read` deadline.
///
/// `put_body` is whatever the renderer framed inside its `PUT`; the artifact
/// is that body followed by the rest of stdout. A stdout drain cut short by
/// its deadline is a timeout: no partial artifact is returned. Non-empty
/// stderr is logged.
pub async fn drain_output<C: ChildProcess>(
    child: &mut C,
    timeouts: &Timeouts,
    mode: RenderMode,
    put_body: Bytes,
) -> Result<(Bytes, Bytes)> {
    let phase = Phase::Draining;
    let stdout = child
        .stdout()
        .read_to_end(Deadline::after(timeouts.read), timeouts.chunk_size)
        .await
        .map_err(|err| RenderError::transport(phase, err))?;
    if !stdout.eof {
        return Err(RenderError::Timeout {
            phase,
            budget: timeouts.read,
        });
    }
    trace!(
        framed = put_body.len(),
        bytes = stdout.bytes.len(),
        "read rendered output"
    );
    let artifact = join_artifact(put_body, stdout.bytes);

    let stderr = match child
        .stderr()
        .read_to_end(Deadline::after(timeouts.read), timeouts.chunk_size)
        .await
    {
        Ok(drained) => drained.bytes,
        Err(err) if err.is_timeout() => {
            warn!(budget = ?timeouts.read, "renderer kept stderr open without writing");
            Bytes::new()
        }
        Err(err) => return Err(RenderError::transport(phase, err)),
    };
    if !stderr.is_empty() {
        warn!(
            stderr = %String::from_utf8_lossy(&stderr).trim_end(),
            "renderer reported diagnostics"
        );
    }

    validate_output(mode, &artifact, &stderr)?;
    Ok((artifact, stderr))
}

fn join_artifact(put_body: Bytes, rest: Bytes) -> Bytes {
    if put_body.is_empty() {
        return rest;
    }
    if rest.is_empty() {
        return put_body;
    }
    let mut joined = BytesMut::with_capacity(put_body.len() + rest.len());
    joined.extend_from_slice(&put_body);
    joined.extend_from_slice(&rest);
    joined.freeze()
}

/// Run the Closed phase: wait, SIGTERM, SIGKILL, reap.
pub async fn close_child<C: ChildProcess>(child: &mut C, wait: Duration) -> Option<ExitStatus> {
    match child.shutdown(wait).await {
        Ok(status) if status.success() => {
            debug!(%status, "renderer exited");
            Some(status)
        }
        Ok(status) => {
            warn!(%status, "renderer exited with non-zero status");
            Some(status)
        }
        Err(err) => {
            warn!(error = %err, "failed to reap renderer");
            None
        }
    }
}

/// One render conversation over a spawned child.
pub struct Conversation<'a, C, F: ?Sized> {
    child: &'a mut C,
    fetcher: &'a F,
    timeouts: Timeouts,
    server: &'a str,
    phase: Phase,
    served: usize,
    put_body: Bytes,
}

impl<'a, C, F> Conversation<'a, C, F>
where
    C: ChildProcess,
    F: AssetFetcher + ?Sized,
{
    pub fn new(child: &'a mut C, fetcher: &'a F, timeouts: Timeouts, server: &'a str) -> Self {
        Self {
            child,
            fetcher,
            timeouts,
            server,
            phase: Phase::Spawning,
            served: 0,
            put_body: Bytes::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Asset requests answered so far.
    pub fn assets_served(&self) -> usize {
        self.served
    }

    /// Take the body framed inside the renderer's `PUT`, if it sent one.
    ///
    /// It is the head of the artifact; stdout carries the rest.
    pub fn take_put_body(&mut self) -> Bytes {
        std::mem::take(&mut self.put_body)
    }

    fn enter(&mut self, next: Phase) {
        debug!(from = %self.phase, to = %next, pid = ?self.child.id(), "phase transition");
        self.phase = next;
    }

    /// Run every phase and return the output.
    pub async fn drive(&mut self, request: &RenderRequest) -> Result<Output> {
        self.exchange(request.document()).await?;
        let put_body = self.take_put_body();
        match drain_output(&mut *self.child, &self.timeouts, request.mode(), put_body).await {
            Ok((artifact, diagnostics)) => {
                self.enter(Phase::Closed);
                let exit_status = close_child(&mut *self.child, self.timeouts.wait).await;
                Ok(Output {
                    artifact,
                    diagnostics,
                    assets_served: self.served,
                    exit_status,
                })
            }
            Err(err) => {
                self.abort(&err).await;
                Err(err)
            }
        }
    }

    /// Send the document, serve assets, and finalize.
    ///
    /// On success the conversation is in [`Phase::Draining`] and the child's
    /// output is ready to be read. On failure the child has been killed.
    pub async fn exchange(&mut self, document: &[u8]) -> Result<()> {
        let result = self.exchange_phases(document).await;
        if let Err(err) = &result {
            self.abort(err).await;
        }
        result
    }

    async fn exchange_phases(&mut self, document: &[u8]) -> Result<()> {
        self.send_document(document).await?;
        self.serve_assets().await?;
        self.finalize().await?;
        self.enter(Phase::Draining);
        Ok(())
    }

    /// Kill the child and mark the conversation failed.
    pub async fn abort(&mut self, cause: &RenderError) {
        debug!(phase = %self.phase, error = %cause, "aborting conversation");
        self.enter(Phase::Failed);
        if let Err(err) = self.child.kill().await {
            warn!(error = %err, "failed to kill renderer");
        }
    }

    /// Whatever the child wrote to stderr, collected within a short bound.
    async fn crash_stderr(&mut self) -> String {
        let budget = CRASH_STDERR_BUDGET.min(self.timeouts.read);
        match self
            .child
            .stderr()
            .read_to_end(Deadline::after(budget), self.timeouts.chunk_size)
            .await
        {
            Ok(drained) => String::from_utf8_lossy(&drained.bytes).into_owned(),
            Err(_) => String::new(),
        }
    }

    fn has_exited(&mut self) -> bool {
        self.child.has_exited().unwrap_or(false)
    }

    /// Whether a failed write was caused by the child going away.
    async fn write_failed_on_exit(&mut self, err: &TransportError) -> bool {
        !err.is_timeout()
            && !matches!(err, TransportError::Cancelled)
            && self.child.exited_within(EXIT_GRACE).await.unwrap_or(false)
    }

    async fn write(&mut self, bytes: &[u8]) -> std::result::Result<(), TransportError> {
        let deadline = Deadline::after(self.timeouts.write);
        self.child.stdin().write_all(bytes, deadline).await
    }

    async fn send_document(&mut self, document: &[u8]) -> Result<()> {
        self.enter(Phase::SendingDocument);
        let phase = self.phase;

        let deadline = Deadline::after(self.timeouts.readline);
        let lines = match consume_header_block(self.child.stdout(), deadline).await {
            Ok(lines) => lines,
            Err(FrameError::Transport(TransportError::EndOfStream)) => {
                return Err(RenderError::Protocol {
                    phase,
                    source: FrameError::Transport(TransportError::EndOfStream),
                });
            }
            Err(err) => return Err(RenderError::frame(phase, err)),
        };
        debug!(lines, "renderer ready");

        if self.has_exited() {
            return Err(RenderError::CrashedEarly {
                stderr: self.crash_stderr().await,
            });
        }

        let response =
            Response::document(Bytes::copy_from_slice(document), &http_date_now(), self.server);
        if let Err(err) = self.write(&response.to_bytes()).await {
            if self.write_failed_on_exit(&err).await {
                return Err(RenderError::CrashedEarly {
                    stderr: self.crash_stderr().await,
                });
            }
            return Err(RenderError::transport(phase, err));
        }
        trace!(bytes = document.len(), "document sent");

        if self.has_exited() {
            return Err(RenderError::CrashedEarly {
                stderr: self.crash_stderr().await,
            });
        }
        Ok(())
    }

    async fn serve_assets(&mut self) -> Result<()> {
        self.enter(Phase::ServingAssets);
        let phase = self.phase;
        loop {
            let deadline = Deadline::after(self.timeouts.readline);
            let request = read_asset_request(self.child.stdout(), deadline)
                .await
                .map_err(|err| RenderError::frame(phase, err))?;
            match request {
                AssetRequest::Put { body, .. } => {
                    debug!(served = self.served, body = body.len(), "renderer finished layout");
                    self.put_body = body;
                    return Ok(());
                }
                AssetRequest::Get { path, .. } => {
                    let index = self.served + 1;
                    self.serve_asset(&path, index).await?;
                    self.served = index;
                }
            }
        }
    }

    fn fetch(&self, path: &str) -> Result<AssetStream> {
        match self.fetcher.fetch(path) {
            Ok(stream) => Ok(stream),
            Err(FetchError::NotFound(_)) => {
                debug!(path, "asset not found");
                Ok(self.status_page(404))
            }
            Err(FetchError::Forbidden(_)) => {
                debug!(path, "asset access denied");
                Ok(self.status_page(403))
            }
            Err(source) => Err(RenderError::Fetch {
                path: path.to_string(),
                source,
            }),
        }
    }

    fn status_page(&self, code: u16) -> AssetStream {
        response_stream(&Response::status_page(code, &http_date_now(), self.server))
    }

    async fn serve_asset(&mut self, path: &str, index: usize) -> Result<()> {
        debug!(index, path, "serving asset");
        let stream = self.fetch(path)?;

        let mut written = 0usize;
        for chunk in stream {
            let chunk = chunk.map_err(|err| RenderError::Fetch {
                path: path.to_string(),
                source: FetchError::Io(err),
            })?;
            if let Err(err) = self.write(&chunk).await {
                if self.write_failed_on_exit(&err).await {
                    return Err(RenderError::CrashedDuringAsset {
                        path: path.to_string(),
                        index,
                        stderr: self.crash_stderr().await,
                    });
                }
                return Err(RenderError::transport(self.phase, err));
            }
            written += chunk.len();
        }
        trace!(index, path, bytes = written, "asset served");

        if self.has_exited() {
            return Err(RenderError::CrashedDuringAsset {
                path: path.to_string(),
                index,
                stderr: self.crash_stderr().await,
            });
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        self.enter(Phase::Finalizing);
        let phase = self.phase;

        if self.has_exited() {
            return Err(RenderError::CrashedBeforeOutput {
                stderr: self.crash_stderr().await,
            });
        }

        let response = Response::finalize(&http_date_now(), self.server);
        if let Err(err) = self.write(&response.to_bytes()).await {
            if self.write_failed_on_exit(&err).await {
                return Err(RenderError::CrashedBeforeOutput {
                    stderr: self.crash_stderr().await,
                });
            }
            return Err(RenderError::transport(phase, err));
        }
        self.child
            .stdin()
            .close_write()
            .await
            .map_err(|err| RenderError::transport(phase, err))?;
        debug!("closed renderer input");
        Ok(())
    }
}
