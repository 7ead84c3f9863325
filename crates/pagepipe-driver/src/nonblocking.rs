//! Async call surface on tokio.
//!
//! Same conversation as [`crate::blocking`], with suspending channels. A
//! [`CancellationToken`] aborts the render at whatever phase it reached;
//! dropping the future kills the renderer through `kill_on_drop`.

use std::process::ExitStatus;

use bytes::Bytes;
use pagepipe_transport::AsyncReader;
use tokio::process::{ChildStderr, ChildStdout};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{DriverConfig, Timeouts};
use crate::conversation::{close_child, drain_output, Conversation, Output, Phase};
use crate::error::{RenderError, Result};
use crate::fetcher::{AssetFetcher, NotFound};
use crate::locate::locate;
use crate::process::ChildProcess;
use crate::process_async::AsyncSupervisor;
use crate::request::{RenderMode, RenderRequest};

/// Async counterpart of [`crate::Renderer`].
#[derive(Debug, Clone)]
pub struct AsyncRenderer<F = NotFound> {
    config: DriverConfig,
    fetcher: F,
    cancel: CancellationToken,
}

impl AsyncRenderer<NotFound> {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            fetcher: NotFound,
            cancel: CancellationToken::new(),
        }
    }
}

impl Default for AsyncRenderer<NotFound> {
    fn default() -> Self {
        Self::new(DriverConfig::default())
    }
}

impl<F: AssetFetcher> AsyncRenderer<F> {
    pub fn with_fetcher<G: AssetFetcher>(self, fetcher: G) -> AsyncRenderer<G> {
        AsyncRenderer {
            config: self.config,
            fetcher,
            cancel: self.cancel,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn spawn(&self, request: &RenderRequest) -> Result<(AsyncSupervisor, Timeouts)> {
        let timeouts = request.timeouts(&self.config.timeouts)?;
        if self.cancel.is_cancelled() {
            return Err(RenderError::Cancelled {
                phase: Phase::Spawning,
            });
        }
        let binary = locate(self.config.binary.as_deref())?;
        let supervisor = AsyncSupervisor::spawn(&binary, &request.args())?;
        Ok((supervisor, timeouts))
    }

    /// Render `request` and return the artifact and diagnostics.
    pub async fn render(&self, request: &RenderRequest) -> Result<Output> {
        let (mut supervisor, timeouts) = self.spawn(request)?;
        let mut conversation =
            Conversation::new(&mut supervisor, &self.fetcher, timeouts, &self.config.server);

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = conversation.drive(request) => Some(result),
        };
        let output = match outcome {
            Some(result) => result?,
            None => return Err(cancelled(&mut conversation).await),
        };
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
    pub async fn rendered(&self, request: &RenderRequest) -> Result<AsyncRendering> {
        let (mut supervisor, timeouts) = self.spawn(request)?;
        let (assets_served, put_body) = {
            let mut conversation =
                Conversation::new(&mut supervisor, &self.fetcher, timeouts, &self.config.server);
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = conversation.exchange(request.document()) => Some(result),
            };
            match outcome {
                Some(result) => result?,
                None => return Err(cancelled(&mut conversation).await),
            }
            (conversation.assets_served(), conversation.take_put_body())
        };
        Ok(AsyncRendering {
            supervisor,
            timeouts,
            mode: request.mode(),
            assets_served,
            put_body,
            cancel: self.cancel.clone(),
        })
    }
}

async fn cancelled<C, F>(conversation: &mut Conversation<'_, C, F>) -> RenderError
where
    C: ChildProcess,
    F: AssetFetcher + ?Sized,
{
    let err = RenderError::Cancelled {
        phase: conversation.phase(),
    };
    conversation.abort(&err).await;
    err
}

/// Render on the current tokio runtime, answering asset requests with `fetcher`.
pub async fn render_async<F: AssetFetcher>(request: &RenderRequest, fetcher: F) -> Result<Output> {
    AsyncRenderer::default().with_fetcher(fetcher).render(request).await
}

/// Like [`render_async`], but hands back the live output streams.
pub async fn rendered_async<F: AssetFetcher>(
    request: &RenderRequest,
    fetcher: F,
) -> Result<AsyncRendering> {
    AsyncRenderer::default()
        .with_fetcher(fetcher)
        .rendered(request)
        .await
}

/// Async counterpart of [`crate::Rendering`].
///
/// Dropping the handle kills the renderer.
pub struct AsyncRendering {
    supervisor: AsyncSupervisor,
    timeouts: Timeouts,
    mode: RenderMode,
    assets_served: usize,
    put_body: Bytes,
    cancel: CancellationToken,
}

impl AsyncRendering {
    pub fn stdout(&mut self) -> &mut AsyncReader<ChildStdout> {
        self.supervisor.stdout()
    }

    pub fn stderr(&mut self) -> &mut AsyncReader<ChildStderr> {
        self.supervisor.stderr()
    }

    pub fn pid(&self) -> Option<u32> {
        self.supervisor.id()
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
    pub async fn read_output(mut self) -> Result<Output> {
        let put_body = std::mem::take(&mut self.put_body);
        let drained = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RenderError::Cancelled {
                phase: Phase::Draining,
            }),
            drained = drain_output(&mut self.supervisor, &self.timeouts, self.mode, put_body) => {
                drained
            }
        };
        let (artifact, diagnostics) = match drained {
            Ok(drained) => drained,
            Err(err) => {
                if let Err(kill_err) = self.supervisor.kill().await {
                    warn!(error = %kill_err, "failed to kill renderer");
                }
                return Err(err);
            }
        };
        let exit_status = close_child(&mut self.supervisor, self.timeouts.wait).await;
        Ok(Output {
            artifact,
            diagnostics,
            assets_served: self.assets_served,
            exit_status,
        })
    }

    /// Close the renderer without reading further output.
    pub async fn finish(mut self) -> Option<ExitStatus> {
        close_child(&mut self.supervisor, self.timeouts.wait).await
    }
}
