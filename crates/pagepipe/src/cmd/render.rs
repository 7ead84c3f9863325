use std::io::Read;
use std::path::Path;

use pagepipe_driver::{
    AssetFetcher, CancelToken, DriverConfig, Output, RenderMode, RenderRequest, Renderer,
    StaticDir,
};
use pagepipe_transport::MAX_DRAIN_CHUNK;
use tracing::{debug, info};

use crate::cmd::{parse_duration, RenderArgs};
use crate::exit::{io_error, render_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_raw, print_summary, OutputFormat, RenderSummary};

pub fn run(args: RenderArgs, mode: RenderMode, format: OutputFormat) -> CliResult<i32> {
    let request = build_request(&args, mode)?;
    let config = build_config(&args)?;

    let cancel = CancelToken::new();
    install_ctrlc_handler(cancel.clone())?;
    let renderer = Renderer::new(config).with_cancel(cancel);

    let output = match &args.assets {
        Some(dir) => {
            debug!(root = %dir.display(), "serving assets from directory");
            render_using(renderer.with_fetcher(StaticDir::new(dir)), &request)?
        }
        None => render_using(renderer, &request)?,
    };

    let destination = args.output.to_string_lossy().into_owned();
    if is_stdio(&args.output) {
        print_raw(&output.artifact);
    } else {
        std::fs::write(&args.output, &output.artifact)
            .map_err(|err| io_error(&format!("failed writing {destination}"), err))?;
        let summary = RenderSummary {
            mode: mode.to_string(),
            output: destination,
            bytes: output.artifact.len(),
            assets_served: output.assets_served,
            exit_status: output.exit_status.and_then(|status| status.code()),
            diagnostics: output.diagnostics_lossy(),
        };
        print_summary(&summary, format);
    }

    Ok(SUCCESS)
}

fn render_using<F: AssetFetcher>(
    renderer: Renderer<F>,
    request: &RenderRequest,
) -> CliResult<Output> {
    let output = renderer
        .render(request)
        .map_err(|err| render_error("render failed", err))?;
    info!(
        bytes = output.artifact.len(),
        assets = output.assets_served,
        "artifact ready"
    );
    Ok(output)
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn read_input(input: &Path) -> CliResult<Vec<u8>> {
    if is_stdio(input) {
        let mut document = Vec::new();
        std::io::stdin()
            .read_to_end(&mut document)
            .map_err(|err| io_error("failed reading stdin", err))?;
        return Ok(document);
    }
    std::fs::read(input)
        .map_err(|err| io_error(&format!("failed reading {}", input.display()), err))
}

fn build_request(args: &RenderArgs, mode: RenderMode) -> CliResult<RenderRequest> {
    let mut request = RenderRequest::new(read_input(&args.input)?, mode);
    for option in &args.options {
        let (name, value) = parse_option(option)?;
        request = request.with_option(name, value);
    }
    Ok(request)
}

fn parse_option(option: &str) -> CliResult<(&str, &str)> {
    match option.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value)),
        _ => Err(CliError::new(
            USAGE,
            format!("--option expects KEY=VALUE, got {option:?}"),
        )),
    }
}

fn build_config(args: &RenderArgs) -> CliResult<DriverConfig> {
    let mut config = DriverConfig::default();
    if let Some(binary) = &args.binary {
        config = config.with_binary(binary);
    }
    if let Some(value) = &args.read_timeout {
        config = config.with_read_timeout(parse_duration(value)?);
    }
    if let Some(value) = &args.readline_timeout {
        config = config.with_readline_timeout(parse_duration(value)?);
    }
    if let Some(value) = &args.write_timeout {
        config = config.with_write_timeout(parse_duration(value)?);
    }
    if let Some(value) = &args.wait_timeout {
        config = config.with_wait_timeout(parse_duration(value)?);
    }
    if let Some(size) = args.chunk_size {
        if size == 0 {
            return Err(CliError::new(USAGE, "--chunk-size must be greater than zero"));
        }
        if size > MAX_DRAIN_CHUNK {
            return Err(CliError::new(
                USAGE,
                format!("--chunk-size must be at most {MAX_DRAIN_CHUNK} bytes"),
            ));
        }
        config = config.with_chunk_size(size);
    }
    Ok(config)
}

fn install_ctrlc_handler(cancel: CancelToken) -> CliResult<()> {
    ctrlc::set_handler(move || {
        cancel.cancel();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    fn args(input: &str) -> RenderArgs {
        RenderArgs {
            input: PathBuf::from(input),
            output: PathBuf::from("-"),
            assets: None,
            binary: None,
            options: Vec::new(),
            read_timeout: None,
            readline_timeout: None,
            write_timeout: None,
            wait_timeout: None,
            chunk_size: None,
        }
    }

    #[test]
    fn parse_option_splits_on_first_equals() {
        assert_eq!(parse_option("paper=A4").unwrap(), ("paper", "A4"));
        assert_eq!(parse_option("title=a=b").unwrap(), ("title", "a=b"));
        assert_eq!(parse_option("flag=").unwrap(), ("flag", ""));
        assert_eq!(parse_option("nokey").unwrap_err().code, USAGE);
        assert_eq!(parse_option("=v").unwrap_err().code, USAGE);
    }

    #[test]
    fn config_takes_flags() {
        let mut args = args("-");
        args.binary = Some(PathBuf::from("/opt/pm"));
        args.read_timeout = Some("2m".to_string());
        args.wait_timeout = Some("500ms".to_string());
        args.chunk_size = Some(1024);

        let config = build_config(&args).expect("flags are valid");
        assert_eq!(config.binary, Some(PathBuf::from("/opt/pm")));
        assert_eq!(config.timeouts.read, Duration::from_secs(120));
        assert_eq!(config.timeouts.wait, Duration::from_millis(500));
        assert_eq!(config.timeouts.chunk_size, 1024);
    }

    #[test]
    fn out_of_range_chunk_size_is_a_usage_error() {
        let mut args = args("-");
        args.chunk_size = Some(0);
        assert_eq!(build_config(&args).unwrap_err().code, USAGE);
        args.chunk_size = Some(MAX_DRAIN_CHUNK + 1);
        assert_eq!(build_config(&args).unwrap_err().code, USAGE);
    }

    #[test]
    fn huge_timeout_option_is_accepted() {
        let mut args = args("-");
        args.read_timeout = Some("18446744073709551615m".to_string());
        let config = build_config(&args).expect("saturated duration is still valid");
        let deadline = pagepipe_transport::Deadline::after(config.timeouts.read);
        assert!(!deadline.is_expired());
    }

    #[test]
    fn missing_input_file_is_reported() {
        let err = read_input(Path::new("/nonexistent/page.html")).unwrap_err();
        assert!(err.message.contains("/nonexistent/page.html"));
    }
}
