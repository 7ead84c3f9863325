use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use pagepipe_driver::RenderMode;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod doctor;
pub mod render;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render a document to PDF.
    Print(RenderArgs),
    /// Render a document to an image.
    Render(RenderArgs),
    /// Locate and probe the renderer.
    Doctor(DoctorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Print(args) => render::run(args, RenderMode::Print, format),
        Command::Render(args) => render::run(args, RenderMode::Render, format),
        Command::Doctor(args) => doctor::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// HTML document to render, or `-` for stdin.
    pub input: PathBuf,
    /// Where to write the artifact, or `-` for stdout.
    #[arg(long, short = 'o', default_value = "-")]
    pub output: PathBuf,
    /// Serve asset requests from this directory.
    #[arg(long, value_name = "DIR")]
    pub assets: Option<PathBuf>,
    /// Renderer executable.
    #[arg(long, value_name = "PATH", env = "PAGEPIPE_RENDERER")]
    pub binary: Option<PathBuf>,
    /// Renderer option, passed as `--KEY VALUE` (repeatable).
    #[arg(long = "option", value_name = "KEY=VALUE")]
    pub options: Vec<String>,
    /// Budget for draining output (e.g. 60s, 2m).
    #[arg(long, value_name = "DURATION")]
    pub read_timeout: Option<String>,
    /// Budget for each line the renderer sends (e.g. 15m).
    #[arg(long, value_name = "DURATION")]
    pub readline_timeout: Option<String>,
    /// Budget for each write to the renderer (e.g. 30s).
    #[arg(long, value_name = "DURATION")]
    pub write_timeout: Option<String>,
    /// Grace period for the renderer to exit (e.g. 5s).
    #[arg(long, value_name = "DURATION")]
    pub wait_timeout: Option<String>,
    /// Read size when draining output, in bytes.
    #[arg(long, value_name = "BYTES")]
    pub chunk_size: Option<usize>,
}

#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Renderer executable.
    #[arg(long, value_name = "PATH", env = "PAGEPIPE_RENDERER")]
    pub binary: Option<PathBuf>,
    /// How long `--version` may take.
    #[arg(long, default_value = "5s")]
    pub probe_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show build details.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `5s`, `2m`, or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else if let Some(num) = input.strip_suffix('m') {
        (num, "m")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}
