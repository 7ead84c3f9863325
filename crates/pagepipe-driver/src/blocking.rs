//! Blocking call surface.
//!
//! Runs the conversation on the calling thread. Pipe I/O waits in `poll(2)`;
//! a [`CancelToken`] shared with another thread aborts it.

use std::process::{ChildStderr, ChildStdout, ExitStatus};

use bytes::Bytes;
use pagepipe_transport::{CancelToken, PollReader};
use pollster::block_on;
use tracing::{info, warn};

use crate::config::{DriverConfig, Timeouts};
use crate::conversation::{close_child, drain_output, Conversation, Output, Phase};
use crate::error::{RenderError, Result};
use crate::fetcher::{AssetFetcher, NotFound};
use crate::locate::locate;
use crate::process::{ChildProcess, Supervisor};
use crate::request::{RenderMode, RenderRequest};

/// Renders documents with one renderer process per call.
#[derive(Debug, Clone)]
pub struct Renderer<F = NotFound> {
    config: DriverConfig,
    fetcher: F,
    cancel: CancelToken,
}

impl Renderer<NotFound> {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            fetcher: NotFound,
            cancel: CancelToken::new(),
        }
    }
}

impl Default for Renderer<NotFound> {
    fn default() -> Self {
        Self::new(DriverConfig::default())
    }
}

impl<F: AssetFetcher> Renderer<F> {
    /// Answer asset requests with `fetcher` instead of 404s.
    pub fn with_fetcher<G: AssetFetcher>(self, fetcher: G) -> Renderer<G> {
        Renderer {
            config: self.config,
            fetcher,
            cancel: self.cancel,
        }
    }

    /// Abort pending I/O when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn spawn(&self, request: &RenderRequest) -> Result<(Supervisor, Timeouts)> {
        let timeouts = request.timeouts(&self.config.timeouts)?;
        if self.cancel.is_cancelled() {
            return Err(RenderError::Cancelled {
                phase: Phase::Spawning,
            });
        }
        let binary = locate(self.config.binary.as_deref())?;
        let supervisor =
            Supervisor::spawn_with_cancel(&binary, &request.args(), self.cancel.clone())?;
        Ok((supervisor, timeouts))
    }

    /// Render `request` and return the artifact and diagnostics.
    pub fn render(&self, request: &RenderRequest) -> Result<Output> {
        let (mut supervisor, timeouts) = self.spawn(request)?;
        let mut conversation =
            Conversation::new(&mut supervisor, &self.fetcher, timeouts, &self.config.server);
        let output = block_on(conversation.drive(request))?;
        info!(
            bytes = output.artifact.len(),
            assets = output.assets_served,
            mode = %request.mode(),
            "render complete"
        );
        Ok(output)
    }

    /// Run the conversation up to the point where output is ready, and hand
    /// the output streams to the caller.
    pub fn rendered(&self, request: &RenderRequest) -> Result<Rendering> {
        let (mut supervisor, timeouts) = self.spawn(request)?;
        let (assets_served, put_body) = {
            let mut conversation =
                Conversation::new(&mut supervisor, &self.fetcher, timeouts, &self.config.server);
            block_on(conversation.exchange(request.document()))?;
            (conversation.assets_served(), conversation.take_put_body())
        };
        Ok(Rendering {
            supervisor,
            timeouts,
            mode: request.mode(),
            assets_served,
            put_body,
            closed: false,
        })
    }
}

/// Render with the default configuration, answering every asset request with a 404.
pub fn render(request: &RenderRequest) -> Result<Output> {
    Renderer::default().render(request)
}

/// Render with the default configuration and `fetcher` for assets.
pub fn render_with<F: AssetFetcher>(request: &RenderRequest, fetcher: F) -> Result<Output> {
    Renderer::default().with_fetcher(fetcher).render(request)
}

/// Like [`render_with`], but hands back the live output streams.
pub fn rendered<F: AssetFetcher>(request: &RenderRequest, fetcher: F) -> Result<Rendering> {
    Renderer::default().with_fetcher(fetcher).rendered(request)
}

/// A renderer that has finished layout and is writing its output.
///
/// Dropping the handle terminates and reaps the renderer.
pub struct Rendering {
    supervisor: Supervisor,
    timeouts: Timeouts,
    mode: RenderMode,
    assets_served: usize,
    put_body: Bytes,
    closed: bool,
}

impl Rendering {
    /// The rendered artifact stream.
    pub fn stdout(&mut self) -> &mut PollReader<ChildStdout> {
        self.supervisor.stdout()
    }

    /// The diagnostics stream.
    pub fn stderr(&mut self) -> &mut PollReader<ChildStderr> {
        self.supervisor.stderr()
    }

    pub fn pid(&self) -> u32 {
        self.supervisor.pid()
    }

    pub fn assets_served(&self) -> usize {
        self.assets_served
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Artifact bytes framed inside the renderer's `PUT`; stdout carries the rest.
    pub fn put_body(&self) -> &Bytes {
        &self.put_body
    }

    /// Drain both streams, validate the artifact, and close the renderer.
    pub fn read_output(mut self) -> Result<Output> {
        let put_body = std::mem::take(&mut self.put_body);
        let drained = block_on(drain_output(
            &mut self.supervisor,
            &self.timeouts,
            self.mode,
            put_body,
        ));
        let (artifact, diagnostics) = match drained {
            Ok(drained) => drained,
            Err(err) => {
                self.closed = true;
                if let Err(kill_err) = self.supervisor.kill_now() {
                    warn!(error = %kill_err, "failed to kill renderer");
                }
                return Err(err);
            }
        };
        let exit_status = self.close();
        Ok(Output {
            artifact,
            diagnostics,
            assets_served: self.assets_served,
            exit_status,
        })
    }

    /// Close the renderer without reading further output.
    pub fn finish(mut self) -> Option<ExitStatus> {
        self.close()
    }

    fn close(&mut self) -> Option<ExitStatus> {
        if self.closed {
            return self.supervisor.status();
        }
        self.closed = true;
        block_on(close_child(&mut self.supervisor, self.timeouts.wait))
    }
}

impl Drop for Rendering {
    fn drop(&mut self) {
        self.close();
    }
}
