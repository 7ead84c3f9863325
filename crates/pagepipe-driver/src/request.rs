use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::config::{Timeouts, RESERVED_OPTIONS};
use crate::error::{RenderError, Result};

/// What the renderer produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RenderMode {
    /// Paginated document (PDF).
    #[default]
    Print,
    /// Raster snapshot.
    Render,
}

impl RenderMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderMode::Print => "print",
            RenderMode::Render => "render",
        }
    }

    /// Prefix every valid artifact of this mode starts with, if the mode has one.
    pub fn expected_prefix(self) -> Option<&'static str> {
        match self {
            RenderMode::Print => Some("%PDF-"),
            RenderMode::Render => None,
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderMode {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "print" => Ok(RenderMode::Print),
            "render" => Ok(RenderMode::Render),
            other => Err(RenderError::InvalidMode(other.to_string())),
        }
    }
}

/// One document to render, with its mode and renderer options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    document: Bytes,
    mode: RenderMode,
    options: BTreeMap<String, String>,
}

impl RenderRequest {
    pub fn new(document: impl Into<Bytes>, mode: RenderMode) -> Self {
        Self {
            document: document.into(),
            mode,
            options: BTreeMap::new(),
        }
    }

    /// A request for an HTML string.
    pub fn from_html(html: &str, mode: RenderMode) -> Self {
        Self::new(Bytes::copy_from_slice(html.as_bytes()), mode)
    }

    /// Set an option. Reserved keys tune the driver; all others are passed to
    /// the renderer as `--<name> <value>`.
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn document(&self) -> &Bytes {
        &self.document
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    /// `base` with this request's reserved options applied.
    pub fn timeouts(&self, base: &Timeouts) -> Result<Timeouts> {
        let mut timeouts = *base;
        timeouts.apply_options(
            self.options
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        )?;
        Ok(timeouts)
    }

    /// Renderer arguments: `<mode> pipe: -o pipe: [--<name> <value>]*`.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            self.mode.as_str().into(),
            "pipe:".into(),
            "-o".into(),
            "pipe:".into(),
        ];
        for (name, value) in &self.options {
            if RESERVED_OPTIONS.contains(&name.as_str()) {
                continue;
            }
            args.push(format!("--{name}").into());
            args.push(value.into());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn mode_parses_only_known_names() {
        assert_eq!("print".parse::<RenderMode>().unwrap(), RenderMode::Print);
        assert_eq!("render".parse::<RenderMode>().unwrap(), RenderMode::Render);
        for bad in ["Print", "pdf", ""] {
            assert!(matches!(
                bad.parse::<RenderMode>(),
                Err(RenderError::InvalidMode(ref m)) if m == bad
            ));
        }
    }

    #[test]
    fn args_select_pipe_mode_and_skip_reserved() {
        let request = RenderRequest::from_html("<p>x</p>", RenderMode::Render)
            .with_option("width", "800")
            .with_option("read_timeout", "5")
            .with_option("chunk_size", "1024")
            .with_option("density", "2x");
        let args: Vec<String> = request
            .args()
            .into_iter()
            .map(|arg| arg.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            vec![
                "render", "pipe:", "-o", "pipe:", "--density", "2x", "--width", "800"
            ]
        );
    }

    #[test]
    fn reserved_options_become_timeouts() {
        let request = RenderRequest::from_html("", RenderMode::Print)
            .with_option("readline_timeout", "2")
            .with_option("paper", "a4");
        let timeouts = request.timeouts(&Timeouts::default()).unwrap();
        assert_eq!(timeouts.readline, Duration::from_secs(2));
        assert_eq!(timeouts.read, Duration::from_secs(60));

        let bad = RenderRequest::from_html("", RenderMode::Print).with_option("write_timeout", "x");
        assert!(bad.timeouts(&Timeouts::default()).is_err());
    }
}
