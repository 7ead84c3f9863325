//! Drives a paper-muncher renderer over its pipe protocol.
//!
//! One renderer process is spawned per render. The driver writes the
//! document to the child's stdin as a synthetic HTTP response, answers the
//! child's asset requests through an [`AssetFetcher`], finalizes on the
//! terminating `PUT`, and collects the artifact from stdout and diagnostics
//! from stderr. A body framed inside the `PUT` is the head of the artifact.
//!
//! The conversation itself ([`Conversation`]) is written once, against the
//! [`ChildProcess`] trait. Two adapters run it:
//! - [`Renderer`] / [`render`]: blocking, on the calling thread
//! - `AsyncRenderer` / `render_async`: on tokio (feature `async`)
//!
//! ```no_run
//! use pagepipe_driver::{render_with, RenderMode, RenderRequest, StaticDir};
//!
//! let request = RenderRequest::from_html("<h1>Hi</h1><img src=\"/logo.png\">", RenderMode::Print);
//! let output = render_with(&request, StaticDir::new("assets"))?;
//! std::fs::write("out.pdf", &output.artifact)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod fetcher;
pub mod locate;
pub mod loopback;
pub mod phase;
pub mod request;

#[cfg(unix)]
pub mod blocking;
#[cfg(unix)]
pub mod conversation;
#[cfg(unix)]
pub mod process;

#[cfg(all(unix, feature = "async"))]
pub mod nonblocking;
#[cfg(all(unix, feature = "async"))]
pub mod process_async;

#[cfg(all(test, unix))]
mod testing;

pub use config::{DriverConfig, Timeouts};
pub use error::{RenderError, Result};
pub use fetcher::{response_stream, AssetFetcher, AssetStream, FetchError, NotFound, StaticDir};
pub use locate::{locate, probe, BINARY_NAME, FALLBACK_PATH};
pub use loopback::{LoopbackFetcher, LoopbackRequest, RequestHandler, RequestScope};
pub use phase::Phase;
pub use request::{RenderMode, RenderRequest};

#[cfg(unix)]
pub use conversation::{close_child, drain_output, validate_output, Conversation, Output};
#[cfg(unix)]
pub use blocking::{render, render_with, rendered, Renderer, Rendering};
#[cfg(unix)]
pub use process::{ChildProcess, StopMode, Supervisor};
#[cfg(unix)]
pub use pagepipe_transport::CancelToken;

#[cfg(all(unix, feature = "async"))]
pub use nonblocking::{render_async, rendered_async, AsyncRenderer, AsyncRendering};
#[cfg(all(unix, feature = "async"))]
pub use process_async::AsyncSupervisor;
#[cfg(all(unix, feature = "async"))]
pub use tokio_util::sync::CancellationToken;
