use std::path::PathBuf;
use std::time::Duration;

use pagepipe_transport::MAX_DRAIN_CHUNK;

use crate::error::{RenderError, Result};

/// Budget for each bulk read from stdout or stderr.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Budget for each protocol line read. Covers the wait for the final `PUT`.
pub const DEFAULT_READLINE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Budget for each write to stdin.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for each wait on process exit.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bytes read per chunk when draining output.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Value of the `Server` header written to the renderer.
pub const DEFAULT_SERVER: &str = concat!("pagepipe/", env!("CARGO_PKG_VERSION"));

/// Option keys consumed by the driver and never forwarded to the renderer.
pub const RESERVED_OPTIONS: [&str; 5] = [
    "read_timeout",
    "readline_timeout",
    "write_timeout",
    "wait_timeout",
    "chunk_size",
];

/// Per-operation I/O budgets.
///
/// Each budget bounds one operation; a fresh deadline is built every time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub read: Duration,
    pub readline: Duration,
    pub write: Duration,
    pub wait: Duration,
    pub chunk_size: usize,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: DEFAULT_READ_TIMEOUT,
            readline: DEFAULT_READLINE_TIMEOUT,
            write: DEFAULT_WRITE_TIMEOUT,
            wait: DEFAULT_WAIT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Timeouts {
    /// Apply one reserved option. Returns `false` if `name` is not reserved.
    ///
    /// Timeouts are in seconds and may be fractional; `chunk_size` is in bytes.
    pub fn apply_option(&mut self, name: &str, value: &str) -> Result<bool> {
        let slot = match name {
            "read_timeout" => &mut self.read,
            "readline_timeout" => &mut self.readline,
            "write_timeout" => &mut self.write,
            "wait_timeout" => &mut self.wait,
            "chunk_size" => {
                self.chunk_size = parse_chunk_size(name, value)?;
                return Ok(true);
            }
            _ => return Ok(false),
        };
        *slot = parse_seconds(name, value)?;
        Ok(true)
    }

    /// Apply every reserved option in `options`, ignoring the rest.
    pub fn apply_options<'a, I>(&mut self, options: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in options {
            self.apply_option(name, value)?;
        }
        Ok(())
    }
}

fn invalid(name: &str, value: &str, reason: &'static str) -> RenderError {
    RenderError::InvalidOption {
        name: name.to_string(),
        value: value.to_string(),
        reason,
    }
}

fn parse_seconds(name: &str, value: &str) -> Result<Duration> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|_| invalid(name, value, "expected a number of seconds"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(invalid(name, value, "must be a positive number of seconds"));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| invalid(name, value, "out of range"))
}

fn parse_chunk_size(name: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(invalid(name, value, "must be at least 1 byte")),
        Ok(size) if size > MAX_DRAIN_CHUNK => Err(invalid(name, value, "must be at most 1 MiB")),
        Ok(size) => Ok(size),
        Err(_) => Err(invalid(name, value, "expected a byte count")),
    }
}

/// Driver configuration shared by the blocking and async entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Renderer executable. `None` looks it up with [`crate::locate::locate`].
    pub binary: Option<PathBuf>,
    pub timeouts: Timeouts,
    /// `Server` header value in synthetic responses.
    pub server: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            binary: None,
            timeouts: Timeouts::default(),
            server: DEFAULT_SERVER.to_string(),
        }
    }
}

impl DriverConfig {
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.read = timeout;
        self
    }

    pub fn with_readline_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.readline = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.write = timeout;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.wait = timeout;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.timeouts.chunk_size = chunk_size.clamp(1, MAX_DRAIN_CHUNK);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_budgets() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.read, Duration::from_secs(60));
        assert_eq!(timeouts.readline, Duration::from_secs(900));
        assert_eq!(timeouts.write, Duration::from_secs(30));
        assert_eq!(timeouts.wait, Duration::from_secs(5));
        assert_eq!(timeouts.chunk_size, 4096);
        assert!(DriverConfig::default().server.starts_with("pagepipe/"));
    }

    #[test]
    fn reserved_options_override_budgets() {
        let mut timeouts = Timeouts::default();
        timeouts
            .apply_options([
                ("read_timeout", "1.5"),
                ("chunk_size", "512"),
                ("dpi", "300"),
            ])
            .unwrap();
        assert_eq!(timeouts.read, Duration::from_millis(1500));
        assert_eq!(timeouts.chunk_size, 512);
        assert!(!timeouts.apply_option("dpi", "300").unwrap());
        assert!(timeouts.apply_option("wait_timeout", "2").unwrap());
        assert_eq!(timeouts.wait, Duration::from_secs(2));
    }

    #[test]
    fn bad_reserved_values_are_rejected() {
        let mut timeouts = Timeouts::default();
        for (name, value) in [
            ("read_timeout", "soon"),
            ("write_timeout", "-1"),
            ("readline_timeout", "0"),
            ("wait_timeout", "inf"),
            ("chunk_size", "0"),
            ("chunk_size", "4k"),
            ("chunk_size", "1048577"),
        ] {
            let err = timeouts.apply_option(name, value).unwrap_err();
            assert!(
                matches!(err, RenderError::InvalidOption { name: ref n, .. } if n == name),
                "{name}={value}"
            );
        }
        assert_eq!(timeouts, Timeouts::default());
    }

    #[test]
    fn huge_timeouts_are_accepted_and_usable() {
        let mut timeouts = Timeouts::default();
        assert!(timeouts.apply_option("read_timeout", "1e19").unwrap());
        assert!(timeouts.read > Duration::from_secs(1 << 60));
        let deadline = pagepipe_transport::Deadline::after(timeouts.read);
        assert!(!deadline.is_expired());

        assert!(timeouts.apply_option("chunk_size", "1048576").unwrap());
        assert_eq!(timeouts.chunk_size, MAX_DRAIN_CHUNK);
    }

    #[test]
    fn builders_compose() {
        let config = DriverConfig::default()
            .with_binary("/usr/bin/true")
            .with_write_timeout(Duration::from_secs(1))
            .with_chunk_size(0)
            .with_server("test/1");
        assert_eq!(config.binary.as_deref(), Some(std::path::Path::new("/usr/bin/true")));
        assert_eq!(config.timeouts.write, Duration::from_secs(1));
        assert_eq!(config.timeouts.chunk_size, 1);
        assert_eq!(config.server, "test/1");
        assert_eq!(
            DriverConfig::default().with_chunk_size(usize::MAX).timeouts.chunk_size,
            MAX_DRAIN_CHUNK
        );
    }
}
