//! Deadline-bounded I/O over one end of a process pipe.
//!
//! Every read and write in pagepipe goes through a channel from this crate:
//! - [`ReadChannel`]: line read, exact read, drain to end of stream
//! - [`WriteChannel`]: write-all and half-close
//!
//! Two implementations share those traits:
//! - [`PollReader`] / [`PollWriter`]: readiness-polled descriptors for the
//!   blocking call surface, with cooperative cancellation via [`CancelToken`]
//! - `AsyncReader` / `AsyncWriter`: tokio streams (behind the `async` feature)
//!
//! This is the lowest layer of pagepipe. The codec and the driver only ever
//! see the traits, never the implementation behind them.

pub mod deadline;
pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod blocking;

#[cfg(feature = "async")]
pub mod tokio_io;

pub use deadline::Deadline;
pub use error::{Result, TransportError};
pub use traits::{Drained, ReadChannel, WriteChannel, MAX_DRAIN_CHUNK};

#[cfg(unix)]
pub use blocking::{CancelToken, PollReader, PollWriter};

#[cfg(feature = "async")]
pub use tokio_io::{AsyncReader, AsyncWriter};
