use std::future::Future;
use std::io::ErrorKind;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::{timeout_at, Instant};
use tracing::{trace, warn};

use crate::deadline::Deadline;
use crate::error::{Result, TransportError};
use crate::traits::{Drained, ReadChannel, WriteChannel, MAX_DRAIN_CHUNK};

fn tokio_instant(deadline: &Deadline) -> Instant {
    Instant::from_std(deadline.instant())
}

/// Read end of a pipe scheduled by the tokio event loop.
///
/// Every operation is a suspension point; dropping the future aborts it.
pub struct AsyncReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin + Send> AsyncReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    /// Consume the channel and return the inner reader. Buffered bytes are dropped.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R: AsyncRead + Unpin + Send> ReadChannel for AsyncReader<R> {
    fn read_line(&mut self, deadline: Deadline) -> impl Future<Output = Result<Bytes>> + Send {
        async move {
            let mut line = Vec::new();
            match timeout_at(tokio_instant(&deadline), self.inner.read_until(b'\n', &mut line))
                .await
            {
                Err(_) => Err(deadline.expired()),
                Ok(Err(err)) => Err(TransportError::Io(err)),
                Ok(Ok(_)) if line.last() == Some(&b'\n') => Ok(Bytes::from(line)),
                Ok(Ok(_)) => Err(TransportError::EndOfStream),
            }
        }
    }

    fn read_exact(
        &mut self,
        len: usize,
        deadline: Deadline,
    ) -> impl Future<Output = Result<Bytes>> + Send {
        async move {
            let mut buf = vec![0u8; len];
            match timeout_at(tokio_instant(&deadline), self.inner.read_exact(&mut buf)).await {
                Err(_) => Err(deadline.expired()),
                Ok(Err(err)) if err.kind() == ErrorKind::UnexpectedEof => {
                    Err(TransportError::EndOfStream)
                }
                Ok(Err(err)) => Err(TransportError::Io(err)),
                Ok(Ok(_)) => Ok(Bytes::from(buf)),
            }
        }
    }

    fn read_to_end(
        &mut self,
        deadline: Deadline,
        chunk_size: usize,
    ) -> impl Future<Output = Result<Drained>> + Send {
        async move {
            let mut out = BytesMut::new();
            let mut chunk = vec![0u8; chunk_size.clamp(1, MAX_DRAIN_CHUNK)];
            loop {
                match timeout_at(tokio_instant(&deadline), self.inner.read(&mut chunk)).await {
                    Err(_) if out.is_empty() => return Err(deadline.expired()),
                    Err(_) => {
                        warn!(
                            bytes = out.len(),
                            budget = ?deadline.budget(),
                            "drain deadline reached before end of stream"
                        );
                        return Ok(Drained {
                            bytes: out.freeze(),
                            eof: false,
                        });
                    }
                    Ok(Ok(0)) => {
                        trace!(bytes = out.len(), "drained pipe to end of stream");
                        return Ok(Drained {
                            bytes: out.freeze(),
                            eof: true,
                        });
                    }
                    Ok(Ok(n)) => out.extend_from_slice(&chunk[..n]),
                    Ok(Err(err)) if err.kind() == ErrorKind::Interrupted => continue,
                    Ok(Err(err)) => return Err(TransportError::Io(err)),
                }
            }
        }
    }
}

/// Write end of a pipe scheduled by the tokio event loop.
pub struct AsyncWriter<W> {
    inner: Option<W>,
    poisoned: bool,
}

impl<W: AsyncWrite + Unpin + Send> AsyncWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: Some(inner),
            poisoned: false,
        }
    }

    /// Whether the write side has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl<W: AsyncWrite + Unpin + Send> WriteChannel for AsyncWriter<W> {
    fn write_all(
        &mut self,
        buf: &[u8],
        deadline: Deadline,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            if self.poisoned {
                return Err(TransportError::Poisoned);
            }
            let inner = self.inner.as_mut().ok_or(TransportError::Closed)?;
            let write = async {
                inner.write_all(buf).await?;
                inner.flush().await
            };
            let result = match timeout_at(tokio_instant(&deadline), write).await {
                Err(_) => Err(deadline.expired()),
                Ok(Err(err)) => Err(TransportError::Io(err)),
                Ok(Ok(())) => Ok(()),
            };
            match result {
                Ok(()) => {
                    trace!(bytes = buf.len(), "wrote to pipe");
                    Ok(())
                }
                Err(err) => {
                    self.poisoned = true;
                    Err(err)
                }
            }
        }
    }

    fn close_write(&mut self) -> impl Future<Output = Result<()>> + Send {
        async move {
            // Child stdin pipes only signal EOF once the descriptor is dropped.
            if let Some(mut inner) = self.inner.take() {
                inner.shutdown().await?;
            }
            Ok(())
        }
    }

    fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}
