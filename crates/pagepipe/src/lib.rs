//! Render HTML by driving a paper-muncher process over its stdin and stdout.
//!
//! # Crate Structure
//!
//! - [`transport`]: deadline-bounded pipe I/O (polled and tokio channels)
//! - [`frame`]: the pseudo-HTTP messages exchanged with the renderer
//! - [`driver`]: process supervision, the render conversation, asset fetchers
//!
//! The most common entry points are re-exported at the crate root.

/// Re-export transport types.
pub mod transport {
    pub use pagepipe_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use pagepipe_frame::*;
}

/// Re-export driver types.
pub mod driver {
    pub use pagepipe_driver::*;
}

pub use pagepipe_driver::{
    AssetFetcher, DriverConfig, FetchError, LoopbackFetcher, NotFound, RenderError, RenderMode,
    RenderRequest, RequestScope, StaticDir, Timeouts,
};

#[cfg(unix)]
pub use pagepipe_driver::{render, render_with, rendered, Output, Renderer, Rendering};

#[cfg(all(unix, feature = "async"))]
pub use pagepipe_driver::{render_async, rendered_async, AsyncRenderer, AsyncRendering};
