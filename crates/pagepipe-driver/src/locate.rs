//! Finding the renderer executable.

use std::ffi::OsStr;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{RenderError, Result};

/// Executable name looked up on `PATH`.
pub const BINARY_NAME: &str = "paper-muncher";

/// Location checked when the executable is not on `PATH`.
pub const FALLBACK_PATH: &str = "/opt/paper-muncher/bin/paper-muncher";

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

/// Search the directories of `path_var` for an executable named `name`.
pub fn find_in(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// Resolve the renderer executable.
///
/// An explicit path must exist. Otherwise `paper-muncher` is looked up on
/// `PATH`, then at [`FALLBACK_PATH`].
pub fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.components().count() == 1 && !path.exists() {
            if let Some(found) = std::env::var_os("PATH")
                .and_then(|var| find_in(&path.to_string_lossy(), &var))
            {
                return Ok(found);
            }
        }
        if is_executable(path) {
            return Ok(path.to_path_buf());
        }
        return Err(RenderError::Launch {
            binary: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "not an executable file"),
        });
    }

    if let Some(found) = std::env::var_os("PATH").and_then(|var| find_in(BINARY_NAME, &var)) {
        debug!(path = %found.display(), "found renderer on PATH");
        return Ok(found);
    }
    let fallback = Path::new(FALLBACK_PATH);
    if is_executable(fallback) {
        debug!(path = FALLBACK_PATH, "using fallback renderer location");
        return Ok(fallback.to_path_buf());
    }
    Err(RenderError::Launch {
        binary: PathBuf::from(BINARY_NAME),
        source: io::Error::new(
            io::ErrorKind::NotFound,
            format!("not found on PATH or at {FALLBACK_PATH}"),
        ),
    })
}

/// Run `<binary> --version` and return the first line it printed.
///
/// The probe is killed if it does not exit within `timeout`. A non-zero exit
/// status means the renderer is not usable.
pub fn probe(binary: &Path, timeout: Duration) -> Result<String> {
    let launch_error = |source: io::Error| RenderError::Launch {
        binary: binary.to_path_buf(),
        source,
    };

    let mut child = Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(launch_error)?;

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().map_err(launch_error)? {
            break status;
        }
        if started.elapsed() >= timeout {
            warn!(binary = %binary.display(), ?timeout, "version probe timed out");
            let _ = child.kill();
            let _ = child.wait();
            return Err(launch_error(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("--version did not exit within {timeout:?}"),
            )));
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let mut stdout = String::new();
    if let Some(mut pipe) = child.stdout.take() {
        pipe.read_to_string(&mut stdout).map_err(launch_error)?;
    }
    if !status.success() {
        return Err(launch_error(io::Error::other(format!(
            "--version exited with {status}"
        ))));
    }
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}
