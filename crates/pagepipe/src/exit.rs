use std::fmt;
use std::io;

use pagepipe_driver::RenderError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const LAUNCH_FAILED: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;
pub const CANCELLED: i32 = 130;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn render_error(context: &str, err: RenderError) -> CliError {
    let code = match &err {
        RenderError::Launch { .. } => LAUNCH_FAILED,
        RenderError::Timeout { .. } => TIMEOUT,
        RenderError::InvalidOutput { .. } => DATA_INVALID,
        RenderError::InvalidMode(_) | RenderError::InvalidOption { .. } => USAGE,
        RenderError::Cancelled { .. } => CANCELLED,
        RenderError::Io { .. } => INTERNAL,
        _ => FAILURE,
    };
    CliError::new(code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use pagepipe_driver::Phase;

    use super::*;

    #[test]
    fn render_errors_map_to_exit_codes() {
        let launch = RenderError::Launch {
            binary: PathBuf::from("/nope"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(render_error("render failed", launch).code, LAUNCH_FAILED);

        let timeout = RenderError::Timeout {
            phase: Phase::ServingAssets,
            budget: Duration::from_secs(1),
        };
        assert_eq!(render_error("render failed", timeout).code, TIMEOUT);

        let cancelled = RenderError::Cancelled {
            phase: Phase::SendingDocument,
        };
        assert_eq!(render_error("render failed", cancelled).code, CANCELLED);

        let crashed = RenderError::CrashedEarly {
            stderr: "boom".to_string(),
        };
        let err = render_error("render failed", crashed);
        assert_eq!(err.code, FAILURE);
        assert!(err.message.starts_with("render failed: "));
    }

    #[test]
    fn io_errors_map_to_exit_codes() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(io_error("open", denied).code, PERMISSION_DENIED);
        let missing = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(io_error("open", missing).code, FAILURE);
    }
}
