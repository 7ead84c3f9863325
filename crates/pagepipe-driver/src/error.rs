use std::path::PathBuf;
use std::time::Duration;

use pagepipe_frame::FrameError;
use pagepipe_transport::TransportError;

use crate::phase::Phase;
use crate::fetcher::FetchError;

/// Errors that can occur while driving a renderer.
///
/// Every variant is reported only after the child process has been killed
/// and reaped.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The renderer executable could not be found or started.
    #[error("failed to launch renderer {binary}: {source}")]
    Launch {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The renderer sent something that is not part of the protocol.
    #[error("protocol error while {phase}: {source}")]
    Protocol {
        phase: Phase,
        #[source]
        source: FrameError,
    },

    /// A deadline elapsed.
    #[error("timed out after {budget:?} while {phase}")]
    Timeout { phase: Phase, budget: Duration },

    /// The renderer closed its output before the phase was complete.
    #[error("renderer closed its output while {phase}")]
    EndOfStream { phase: Phase },

    /// The renderer exited before it received the document.
    #[error("renderer terminated before receiving the document{}", stderr_suffix(.stderr))]
    CrashedEarly { stderr: String },

    /// The renderer exited while an asset was being served.
    #[error("renderer crashed while serving asset {index}: {path}{}", stderr_suffix(.stderr))]
    CrashedDuringAsset {
        path: String,
        /// 1-based position of the request in the conversation.
        index: usize,
        stderr: String,
    },

    /// The renderer exited before returning its output.
    #[error("renderer crashed before returning the rendered output{}", stderr_suffix(.stderr))]
    CrashedBeforeOutput { stderr: String },

    /// The output does not look like the requested format.
    #[error("renderer output does not start with {expected:?}{}", stderr_suffix(.stderr))]
    InvalidOutput {
        expected: &'static str,
        stderr: String,
    },

    /// The render mode is neither `print` nor `render`.
    #[error("invalid render mode {0:?} (expected \"print\" or \"render\")")]
    InvalidMode(String),

    /// A reserved option has an unusable value.
    #[error("invalid value {value:?} for option {name}: {reason}")]
    InvalidOption {
        name: String,
        value: String,
        reason: &'static str,
    },

    /// The asset fetcher failed on a request it could not answer.
    #[error("fetching asset {path} failed: {source}")]
    Fetch {
        path: String,
        #[source]
        source: FetchError,
    },

    /// The caller cancelled the render.
    #[error("render cancelled while {phase}")]
    Cancelled { phase: Phase },

    /// An I/O error on one of the renderer's pipes.
    #[error("I/O error while {phase}: {source}")]
    Io {
        phase: Phase,
        #[source]
        source: std::io::Error,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

impl RenderError {
    /// Map a channel failure observed during `phase`.
    pub(crate) fn transport(phase: Phase, err: TransportError) -> Self {
        match err {
            TransportError::Timeout { budget } => RenderError::Timeout { phase, budget },
            TransportError::EndOfStream => RenderError::EndOfStream { phase },
            TransportError::Cancelled => RenderError::Cancelled { phase },
            TransportError::Io(source) => RenderError::Io { phase, source },
            other @ (TransportError::Poisoned | TransportError::Closed) => RenderError::Io {
                phase,
                source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, other),
            },
        }
    }

    /// Map a framing failure observed during `phase`.
    pub(crate) fn frame(phase: Phase, err: FrameError) -> Self {
        match err {
            FrameError::Transport(inner) => RenderError::transport(phase, inner),
            source => RenderError::Protocol { phase, source },
        }
    }

    /// Diagnostics the renderer wrote before failing, if any were captured.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            RenderError::CrashedEarly { stderr }
            | RenderError::CrashedDuringAsset { stderr, .. }
            | RenderError::CrashedBeforeOutput { stderr }
            | RenderError::InvalidOutput { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RenderError::Timeout { .. })
    }

    /// Whether the renderer process exited or closed its output unexpectedly.
    pub fn is_crash(&self) -> bool {
        matches!(
            self,
            RenderError::CrashedEarly { .. }
                | RenderError::CrashedDuringAsset { .. }
                | RenderError::CrashedBeforeOutput { .. }
                | RenderError::EndOfStream { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
