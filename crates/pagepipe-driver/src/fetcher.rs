//! Answering the renderer's asset requests.
//!
//! An [`AssetFetcher`] turns a requested path into the complete HTTP response
//! (status line, headers, body) that is written back to the renderer. The
//! driver writes the chunks verbatim; it does not inspect them.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use pagepipe_frame::{http_date_now, Response};
use tracing::debug;

use crate::config::{DEFAULT_CHUNK_SIZE, DEFAULT_SERVER};

/// A single-use sequence of response chunks.
pub type AssetStream = Box<dyn Iterator<Item = io::Result<Bytes>> + Send>;

/// Why a fetcher could not produce a response.
///
/// `NotFound` and `Forbidden` are answered to the renderer with a 404 or
/// 403; every other variant aborts the render.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("asset not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    Forbidden(String),

    #[error("asset I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("request handler failed: {0}")]
    Handler(String),
}

/// Source of asset responses.
pub trait AssetFetcher: Send + Sync {
    /// Produce the full response for `path`, exactly as the renderer requested it.
    fn fetch(&self, path: &str) -> Result<AssetStream, FetchError>;
}

impl<F> AssetFetcher for F
where
    F: Fn(&str) -> Result<AssetStream, FetchError> + Send + Sync,
{
    fn fetch(&self, path: &str) -> Result<AssetStream, FetchError> {
        self(path)
    }
}

/// Turn a finished response into an [`AssetStream`] of bounded chunks.
pub fn response_stream(response: &Response) -> AssetStream {
    Box::new(
        response
            .chunks(pagepipe_frame::MAX_CHUNK_SIZE)
            .map(Ok::<Bytes, io::Error>),
    )
}

/// Fetcher that knows no assets. Every request is answered with a 404.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

impl AssetFetcher for NotFound {
    fn fetch(&self, path: &str) -> Result<AssetStream, FetchError> {
        Err(FetchError::NotFound(path.to_string()))
    }
}

/// Strip the query string and fragment from a request target.
pub(crate) fn split_target(target: &str) -> (&str, &str) {
    let without_fragment = target.split('#').next().unwrap_or_default();
    match without_fragment.split_once('?') {
        Some((path, query)) => (path, query),
        None => (without_fragment, ""),
    }
}

/// Read a file in fixed-size chunks.
pub(crate) struct FileChunks {
    file: File,
    chunk_size: usize,
}

impl FileChunks {
    pub(crate) fn new(file: File, chunk_size: usize) -> Self {
        Self {
            file,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Iterator for FileChunks {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            match self.file.read(&mut buf) {
                Ok(0) => return None,
                Ok(n) => {
                    buf.truncate(n);
                    return Some(Ok(Bytes::from(buf)));
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Open `path` and build the stream for a file response: head first, then the file.
pub(crate) fn file_stream(
    path: &Path,
    code: u16,
    content_type: Option<&str>,
    server: &str,
    chunk_size: usize,
) -> Result<AssetStream, FetchError> {
    let file = File::open(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => FetchError::NotFound(path.display().to_string()),
        io::ErrorKind::PermissionDenied => FetchError::Forbidden(path.display().to_string()),
        _ => FetchError::Io(err),
    })?;
    let metadata = file.metadata()?;
    if !metadata.is_file() {
        return Err(FetchError::NotFound(path.display().to_string()));
    }

    let content_type = match content_type {
        Some(value) => value.to_string(),
        None => mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    };
    let head = Response::new(code)
        .with_header("Date", http_date_now())
        .with_header("Server", server)
        .with_header("Content-Length", metadata.len().to_string())
        .with_header("Content-Type", content_type);
    let mut encoded = bytes::BytesMut::new();
    head.encode_head(&mut encoded);

    debug!(path = %path.display(), bytes = metadata.len(), "streaming file");
    Ok(Box::new(
        std::iter::once(Ok(encoded.freeze())).chain(FileChunks::new(file, chunk_size)),
    ))
}

/// Serves assets from a directory.
///
/// Request targets are resolved under the root after dropping the query
/// string; targets that would leave the root are refused.
#[derive(Debug, Clone)]
pub struct StaticDir {
    root: PathBuf,
    server: String,
    chunk_size: usize,
}

impl StaticDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            server: DEFAULT_SERVER.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a request target to a file below the root.
    pub fn resolve(&self, target: &str) -> Result<PathBuf, FetchError> {
        let (path, _) = split_target(target);
        let mut resolved = self.root.clone();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(FetchError::Forbidden(target.to_string()));
                }
            }
        }
        if resolved == self.root {
            return Err(FetchError::NotFound(target.to_string()));
        }
        Ok(resolved)
    }
}

impl AssetFetcher for StaticDir {
    fn fetch(&self, path: &str) -> Result<AssetStream, FetchError> {
        let file = self.resolve(path)?;
        file_stream(&file, 200, None, &self.server, self.chunk_size).map_err(|err| match err {
            FetchError::NotFound(_) => FetchError::NotFound(path.to_string()),
            other => other,
        })
    }
}
