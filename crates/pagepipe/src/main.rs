mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "pagepipe", version, about = "Render HTML with paper-muncher")]
struct Cli {
    /// Report format (stdout).
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr). PAGEPIPE_LOG takes precedence.
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_print_subcommand() {
        let cli = Cli::try_parse_from([
            "pagepipe",
            "print",
            "page.html",
            "-o",
            "page.pdf",
            "--option",
            "paper=A4",
            "--read-timeout",
            "5s",
        ])
        .expect("print args should parse");

        match cli.command {
            Command::Print(args) => {
                assert_eq!(args.output.to_str(), Some("page.pdf"));
                assert_eq!(args.options, vec!["paper=A4".to_string()]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_render_with_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["pagepipe", "render", "-", "--format", "json"])
            .expect("render args should parse");
        assert!(matches!(cli.command, Command::Render(_)));
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
    }

    #[test]
    fn rejects_missing_input() {
        let err = Cli::try_parse_from(["pagepipe", "print"]).expect_err("input is required");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
